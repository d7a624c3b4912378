//! Emergency contact domain models.

use chrono::{DateTime, Utc};
use log::warn;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Prefix of ids minted on the device before the server has seen the contact.
pub const TEMP_ID_PREFIX: &str = "temp_";

/// A person in the user's emergency circle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub relationship: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    /// Derived: true iff the id was present in the last fetched server snapshot.
    #[serde(default)]
    pub synced: bool,
}

impl Contact {
    /// Builds an unsynced contact with a temporary client-side id.
    pub fn new_local(new_contact: NewContact) -> Self {
        Self {
            id: generate_temp_id(),
            name: new_contact.name.trim().to_string(),
            phone: new_contact.phone.trim().to_string(),
            relationship: new_contact.relationship.trim().to_string(),
            created_at: Utc::now(),
            synced: false,
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }

    /// Dedup key: digits only, keeping a leading `+`.
    pub fn phone_key(&self) -> String {
        normalize_phone(&self.phone)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::validation("Contact id is required"));
        }
        if self.phone_key().trim_start_matches('+').is_empty() {
            return Err(Error::validation(format!(
                "Contact '{}' has no usable phone number",
                self.id
            )));
        }
        Ok(())
    }
}

/// Input for adding a contact from the picker or a form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContact {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub relationship: String,
}

impl NewContact {
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
            relationship: String::new(),
        }
    }

    pub fn with_relationship(mut self, relationship: impl Into<String>) -> Self {
        self.relationship = relationship.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("Contact name is required"));
        }
        if normalize_phone(&self.phone).trim_start_matches('+').is_empty() {
            return Err(Error::validation("Contact phone number is required"));
        }
        Ok(())
    }
}

/// `temp_<unix millis>_<9 random chars>`
pub fn generate_temp_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!(
        "{}{}_{}",
        TEMP_ID_PREFIX,
        Utc::now().timestamp_millis(),
        suffix
    )
}

/// Strips formatting so `(555) 111-2222` and `555-111-2222` compare equal.
pub fn normalize_phone(phone: &str) -> String {
    let trimmed = phone.trim();
    let mut key = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        key.push('+');
    }
    key.extend(trimmed.chars().filter(|c| c.is_ascii_digit()));
    key
}

/// The ordered collection of contacts considered "the circle".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactSet(Vec<Contact>);

impl ContactSet {
    pub fn new(contacts: Vec<Contact>) -> Self {
        Self(contacts)
    }

    /// Keeps only contacts that pass schema validation.
    ///
    /// Used when loading the persisted snapshot so a single malformed record
    /// cannot block the rest of the circle.
    pub fn from_untrusted(contacts: Vec<Contact>, source: &str) -> Self {
        let total = contacts.len();
        let valid: Vec<Contact> = contacts
            .into_iter()
            .filter(|contact| match contact.validate() {
                Ok(()) => true,
                Err(err) => {
                    warn!("[ContactSync] Dropping invalid {} contact: {}", source, err);
                    false
                }
            })
            .collect();
        if valid.len() != total {
            warn!(
                "[ContactSync] Kept {} of {} {} contacts after validation",
                valid.len(),
                total,
                source
            );
        }
        Self(valid)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Contact> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Contact] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<Contact> {
        self.0
    }

    pub fn push(&mut self, contact: Contact) {
        self.0.push(contact);
    }

    pub fn get(&self, id: &str) -> Option<&Contact> {
        self.0.iter().find(|c| c.id == id)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn find_by_phone(&self, phone: &str) -> Option<&Contact> {
        let key = normalize_phone(phone);
        self.0.iter().find(|c| c.phone_key() == key)
    }

    /// Returns a copy without the contact `id`, or `None` if it was absent.
    pub fn without(&self, id: &str) -> Option<ContactSet> {
        if !self.contains_id(id) {
            return None;
        }
        Some(Self(self.0.iter().filter(|c| c.id != id).cloned().collect()))
    }

    pub fn unsynced_count(&self) -> usize {
        self.0.iter().filter(|c| !c.synced).count()
    }

    pub fn has_unsynced(&self) -> bool {
        self.0.iter().any(|c| !c.synced)
    }
}

impl From<Vec<Contact>> for ContactSet {
    fn from(contacts: Vec<Contact>) -> Self {
        Self(contacts)
    }
}

impl IntoIterator for ContactSet {
    type Item = Contact;
    type IntoIter = std::vec::IntoIter<Contact>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ContactSet {
    type Item = &'a Contact;
    type IntoIter = std::slice::Iter<'a, Contact>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Pending deletion of a contact the server already knows about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub id: String,
    #[serde(default)]
    pub phone: String,
    pub removed_at: DateTime<Utc>,
}

impl Tombstone {
    pub fn for_contact(contact: &Contact, removed_at: DateTime<Utc>) -> Self {
        Self {
            id: contact.id.clone(),
            phone: contact.phone.clone(),
            removed_at,
        }
    }
}

/// The remote contact service payload.
///
/// A POST replaces the whole record on the server, so everything this side
/// does not own is carried through untouched: `user_info`, `medical_info`
/// and contact entries that do not decode or validate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RecordIn", into = "RecordOut")]
pub struct ContactRecord {
    pub emergency_contacts: Vec<Contact>,
    /// Server entries under `emergencyContacts` that are not valid contacts.
    /// Hidden from the merge and written back verbatim after the contacts.
    pub unrecognized_contacts: Vec<serde_json::Value>,
    pub user_info: serde_json::Value,
    pub medical_info: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordIn {
    #[serde(default)]
    emergency_contacts: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    user_info: serde_json::Value,
    #[serde(default)]
    medical_info: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordOut {
    emergency_contacts: Vec<RecordEntry>,
    user_info: serde_json::Value,
    medical_info: serde_json::Value,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RecordEntry {
    Contact(Contact),
    Raw(serde_json::Value),
}

fn recognize_contact(value: &serde_json::Value) -> Result<Contact> {
    let contact = serde_json::from_value::<Contact>(value.clone())
        .map_err(|e| Error::validation(format!("Undecodable contact: {}", e)))?;
    contact.validate()?;
    Ok(contact)
}

impl From<RecordIn> for ContactRecord {
    fn from(raw: RecordIn) -> Self {
        let mut emergency_contacts = Vec::new();
        let mut unrecognized_contacts = Vec::new();
        for value in raw.emergency_contacts.unwrap_or_default() {
            match recognize_contact(&value) {
                Ok(contact) => emergency_contacts.push(contact),
                Err(err) => {
                    warn!("[ContactSync] Carrying unrecognized contact entry: {}", err);
                    unrecognized_contacts.push(value);
                }
            }
        }
        Self {
            emergency_contacts,
            unrecognized_contacts,
            user_info: raw.user_info,
            medical_info: raw.medical_info,
        }
    }
}

impl From<ContactRecord> for RecordOut {
    fn from(record: ContactRecord) -> Self {
        let emergency_contacts = record
            .emergency_contacts
            .into_iter()
            .map(RecordEntry::Contact)
            .chain(
                record
                    .unrecognized_contacts
                    .into_iter()
                    .map(RecordEntry::Raw),
            )
            .collect();
        Self {
            emergency_contacts,
            user_info: record.user_info,
            medical_info: record.medical_info,
        }
    }
}

impl ContactRecord {
    /// Splits the record into the contacts that take part in the merge and
    /// the raw entries that only ride along.
    ///
    /// Invalid entries in `emergency_contacts` (possible when the record was
    /// built in process rather than decoded) join the raw side.
    pub fn partition_contacts(&self) -> (ContactSet, Vec<serde_json::Value>) {
        let mut valid = Vec::with_capacity(self.emergency_contacts.len());
        let mut raw = Vec::new();
        for contact in &self.emergency_contacts {
            if let Err(err) = contact.validate() {
                warn!("[ContactSync] Carrying invalid remote contact: {}", err);
                match serde_json::to_value(contact) {
                    Ok(value) => raw.push(value),
                    Err(e) => warn!(
                        "[ContactSync] Failed to encode contact '{}': {}",
                        contact.id, e
                    ),
                }
                continue;
            }
            valid.push(contact.clone());
        }
        raw.extend(self.unrecognized_contacts.iter().cloned());
        (ContactSet::new(valid), raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(id: &str, phone: &str) -> Contact {
        Contact {
            id: id.to_string(),
            name: "Test".to_string(),
            phone: phone.to_string(),
            relationship: String::new(),
            created_at: Utc::now(),
            synced: false,
        }
    }

    #[test]
    fn temp_ids_are_prefixed_and_unique() {
        let a = generate_temp_id();
        let b = generate_temp_id();
        assert!(a.starts_with(TEMP_ID_PREFIX));
        assert_ne!(a, b);
        assert!(Contact::new_local(NewContact::new("Mom", "555-0001")).is_temporary());
    }

    #[test]
    fn phone_normalization_ignores_formatting() {
        assert_eq!(normalize_phone("(555) 111-2222"), "5551112222");
        assert_eq!(normalize_phone(" +1 555 111 2222 "), "+15551112222");
        assert_eq!(normalize_phone("ext"), "");
    }

    #[test]
    fn validation_requires_id_and_phone() {
        assert!(contact("srv_1", "555-1111").validate().is_ok());
        assert!(contact("", "555-1111").validate().is_err());
        assert!(contact("srv_1", "n/a").validate().is_err());
        assert!(NewContact::new("  ", "555").validate().is_err());
    }

    #[test]
    fn untrusted_sets_drop_invalid_entries() {
        let set = ContactSet::from_untrusted(
            vec![contact("a", "555-0001"), contact("", "555-0002")],
            "test",
        );
        assert_eq!(set.len(), 1);
        assert!(set.contains_id("a"));
    }

    #[test]
    fn record_uses_camel_case_and_tolerates_missing_fields() {
        let record: ContactRecord = serde_json::from_str(
            r#"{"emergencyContacts":[{"id":"srv_9","name":"Dad","phone":"555-1111","createdAt":"2026-01-01T00:00:00Z"}]}"#,
        )
        .expect("decode record");
        assert_eq!(record.emergency_contacts.len(), 1);
        assert!(!record.emergency_contacts[0].synced);
        assert_eq!(record.user_info, serde_json::Value::Null);

        let empty: ContactRecord = serde_json::from_str("{}").expect("decode empty record");
        assert!(empty.partition_contacts().0.is_empty());
        let nulled: ContactRecord =
            serde_json::from_str(r#"{"emergencyContacts":null}"#).expect("decode null contacts");
        assert!(nulled.emergency_contacts.is_empty());

        let encoded = serde_json::to_value(&record).expect("encode record");
        assert!(encoded.get("emergencyContacts").is_some());
        assert!(encoded["emergencyContacts"][0].get("createdAt").is_some());
    }

    #[test]
    fn unrecognized_entries_survive_a_round_trip() {
        let record: ContactRecord = serde_json::from_str(
            r#"{"emergencyContacts":[
                {"id":"srv_1","name":"Dad","phone":"555-0001"},
                {"id":"srv_2","name":"Office","phone":"landline"},
                {"label":"not a contact"}
            ],"userInfo":{"name":"Alex"}}"#,
        )
        .expect("decode record");

        assert_eq!(record.emergency_contacts.len(), 1);
        assert_eq!(record.unrecognized_contacts.len(), 2);
        let (contacts, raw) = record.partition_contacts();
        assert_eq!(contacts.len(), 1);
        assert_eq!(raw.len(), 2);

        let encoded = serde_json::to_value(&record).expect("encode record");
        let entries = encoded["emergencyContacts"].as_array().expect("contacts array");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1]["phone"], "landline");
        assert_eq!(entries[2]["label"], "not a contact");
    }

    #[test]
    fn invalid_in_process_contacts_join_the_raw_side() {
        let record = ContactRecord {
            emergency_contacts: vec![contact("srv_1", "555-0001"), contact("srv_2", "n/a")],
            ..ContactRecord::default()
        };
        let (contacts, raw) = record.partition_contacts();
        assert!(contacts.contains_id("srv_1"));
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0]["id"], "srv_2");
    }
}
