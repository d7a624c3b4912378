//! Reconciliation of the local circle against the server snapshot.
//!
//! Everything here is pure: no I/O, no clock reads.

use std::collections::HashSet;

use super::contacts_model::{normalize_phone, Contact, ContactSet, Tombstone};

/// Combines the local set with the remote snapshot.
///
/// Rule:
/// 1. the remote set is the baseline and wins on content
/// 2. local contacts unknown to the remote (by id or phone) are appended as unsynced
/// 3. `synced` is true exactly for ids present in the remote set
///
/// Duplicates by id or phone inside either input keep their first
/// occurrence, so ids and phone numbers are unique in the result.
pub fn merge(local: &ContactSet, remote: &ContactSet) -> ContactSet {
    let mut seen_ids: HashSet<&str> = remote.iter().map(|c| c.id.as_str()).collect();
    let mut emitted_remote: HashSet<&str> = HashSet::with_capacity(remote.len());
    let mut seen_phones: HashSet<String> = HashSet::with_capacity(remote.len() + local.len());
    let mut merged: Vec<Contact> = Vec::with_capacity(remote.len() + local.len());

    for contact in remote {
        if emitted_remote.contains(contact.id.as_str()) {
            continue;
        }
        if !claim_phone(&mut seen_phones, contact) {
            continue;
        }
        emitted_remote.insert(contact.id.as_str());
        merged.push(Contact {
            synced: true,
            ..contact.clone()
        });
    }

    for contact in local {
        if seen_ids.contains(contact.id.as_str()) {
            continue;
        }
        if !claim_phone(&mut seen_phones, contact) {
            continue;
        }
        seen_ids.insert(contact.id.as_str());
        merged.push(Contact {
            synced: false,
            ..contact.clone()
        });
    }

    ContactSet::new(merged)
}

/// Records the contact's phone key; false if another contact already owns it.
/// Contacts without a usable phone never collide.
fn claim_phone(seen_phones: &mut HashSet<String>, contact: &Contact) -> bool {
    let key = contact.phone_key();
    if key.is_empty() {
        return true;
    }
    seen_phones.insert(key)
}

/// Drops remote contacts whose deletion has not been pushed yet, matched by
/// id or normalized phone.
pub fn without_tombstones(remote: &ContactSet, tombstones: &[Tombstone]) -> ContactSet {
    if tombstones.is_empty() {
        return remote.clone();
    }
    let deleted_ids: HashSet<&str> = tombstones.iter().map(|t| t.id.as_str()).collect();
    let deleted_phones: HashSet<String> = tombstones
        .iter()
        .map(|t| normalize_phone(&t.phone))
        .filter(|key| !key.is_empty())
        .collect();
    ContactSet::new(
        remote
            .iter()
            .filter(|c| {
                !deleted_ids.contains(c.id.as_str()) && !deleted_phones.contains(&c.phone_key())
            })
            .cloned()
            .collect(),
    )
}

/// Contacts present in `before` whose id is gone from `after`.
pub fn removed_contacts(before: &ContactSet, after: &ContactSet) -> Vec<Contact> {
    let remaining: HashSet<&str> = after.iter().map(|c| c.id.as_str()).collect();
    before
        .iter()
        .filter(|c| !remaining.contains(c.id.as_str()))
        .cloned()
        .collect()
}

/// Marks contacts included in a successful push as synced.
pub fn mark_pushed(contacts: &ContactSet, pushed_ids: &HashSet<String>) -> ContactSet {
    ContactSet::new(
        contacts
            .iter()
            .map(|c| Contact {
                synced: c.synced || pushed_ids.contains(&c.id),
                ..c.clone()
            })
            .collect(),
    )
}

/// Marks contacts whose content still matches the pushed version as synced.
///
/// Contacts edited after the payload was built stay unsynced so the next
/// push carries the newer content.
pub fn confirm_pushed(current: &ContactSet, pushed: &ContactSet) -> ContactSet {
    let confirmed: HashSet<String> = current
        .iter()
        .filter(|c| pushed.get(&c.id).is_some_and(|p| same_content(c, p)))
        .map(|c| c.id.clone())
        .collect();
    mark_pushed(current, &confirmed)
}

fn same_content(a: &Contact, b: &Contact) -> bool {
    a.id == b.id
        && a.name == b.name
        && a.phone == b.phone
        && a.relationship == b.relationship
        && a.created_at == b.created_at
}

/// Pushed contacts that left `current` while the push was in flight and
/// have no tombstone yet. The server holds them now, so each needs one.
pub fn removed_during_push(
    current: &ContactSet,
    pushed: &ContactSet,
    tombstones: &[Tombstone],
) -> Vec<Contact> {
    pushed
        .iter()
        .filter(|c| !current.contains_id(&c.id) && !tombstones.iter().any(|t| t.id == c.id))
        .cloned()
        .collect()
}

/// Tombstones whose contact (by id or phone) is still on the server.
pub fn outstanding_tombstones(remote: &ContactSet, tombstones: &[Tombstone]) -> Vec<Tombstone> {
    tombstones
        .iter()
        .filter(|t| {
            let phone = normalize_phone(&t.phone);
            remote
                .iter()
                .any(|c| c.id == t.id || (!phone.is_empty() && c.phone_key() == phone))
        })
        .cloned()
        .collect()
}

/// Replays a staged edit on top of the current set.
///
/// `staged` was derived from `base`; `current` may have moved on since (a
/// reconcile pulled or pushed in between). Contacts the user left untouched
/// take their latest version from `current`, contacts that appeared in
/// `current` after `base` are kept, and contacts the user removed stay removed.
pub fn rebase_staged(staged: &ContactSet, base: &ContactSet, current: &ContactSet) -> ContactSet {
    let mut rebased: Vec<Contact> = Vec::with_capacity(staged.len());

    for contact in staged {
        let untouched = base.get(&contact.id) == Some(contact);
        match current.get(&contact.id) {
            Some(latest) if untouched => rebased.push(latest.clone()),
            Some(latest) => rebased.push(Contact {
                synced: latest.synced,
                ..contact.clone()
            }),
            // Dropped by a reconcile since the edit was based.
            None if untouched => {}
            None => rebased.push(Contact {
                synced: false,
                ..contact.clone()
            }),
        }
    }

    for contact in current {
        if !base.contains_id(&contact.id) && !staged.contains_id(&contact.id) {
            rebased.push(contact.clone());
        }
    }

    ContactSet::new(rebased)
}

/// Local mutations not yet confirmed by a server round-trip.
pub fn pending_operations(contacts: &ContactSet, tombstones: &[Tombstone]) -> usize {
    contacts.unsynced_count() + tombstones.len()
}
