use crate::client::Client;
use crate::error::ClientError;
use crate::request::timestamp_ms;
use indexmap::IndexMap;
use log::{debug, info};
use std::sync::{PoisonError, RwLock};
use wxcore::request::{
    BatchContactQuery, BatchGetContactRequest, BatchGetContactResponse, ContactListResponse,
    OplogCommand, OplogRequest, OplogResponse,
};
use wxcore::types::contact::{Contact, ContactDelta, Group};
use wxcore::types::events::Event;
use wxcore::urls::with_query;

/// What one round of deltas changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactChanges {
    pub upserted: Vec<String>,
    pub removed: Vec<String>,
}

impl ContactChanges {
    pub fn is_empty(&self) -> bool {
        self.upserted.is_empty() && self.removed.is_empty()
    }
}

#[derive(Default)]
struct ContactCache {
    contacts: IndexMap<String, Contact>,
    self_user_name: Option<String>,
}

/// Contacts of the logged-in account, keyed by `UserName` and kept in the
/// order they were first seen.
///
/// Reads hand out owned copies; the lock is never held across an await.
#[derive(Default)]
pub struct ContactStore {
    inner: RwLock<ContactCache>,
}

impl ContactStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ContactCache> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ContactCache> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies one delta. Returns false when it changed nothing (removal of
    /// an unknown id).
    pub fn apply_delta(&self, delta: ContactDelta) -> bool {
        let mut cache = self.write();
        apply(&mut cache, delta)
    }

    /// Applies deltas in order under a single lock.
    pub fn apply_all(&self, deltas: impl IntoIterator<Item = ContactDelta>) -> ContactChanges {
        let mut cache = self.write();
        let mut changes = ContactChanges::default();
        for delta in deltas {
            let id = match &delta {
                ContactDelta::Upsert(c) => c.id().to_string(),
                ContactDelta::Remove(id) => id.clone(),
            };
            let is_upsert = matches!(delta, ContactDelta::Upsert(_));
            if apply(&mut cache, delta) {
                if is_upsert {
                    changes.upserted.push(id);
                } else {
                    changes.removed.push(id);
                }
            }
        }
        changes
    }

    pub fn get(&self, id: &str) -> Option<Contact> {
        self.read().contacts.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contacts.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().contacts.is_empty()
    }

    pub fn all(&self) -> Vec<Contact> {
        self.read().contacts.values().cloned().collect()
    }

    pub fn friends(&self) -> Vec<Contact> {
        self.filtered(|c| matches!(c, Contact::Friend(_)))
    }

    pub fn groups(&self) -> Vec<Group> {
        self.read()
            .contacts
            .values()
            .filter_map(|c| c.as_group().cloned())
            .collect()
    }

    pub fn service_accounts(&self) -> Vec<Contact> {
        self.filtered(|c| matches!(c, Contact::ServiceAccount(_)))
    }

    pub fn self_user(&self) -> Option<Contact> {
        let cache = self.read();
        let name = cache.self_user_name.as_deref()?;
        cache.contacts.get(name).cloned()
    }

    pub fn self_user_name(&self) -> Option<String> {
        self.read().self_user_name.clone()
    }

    pub(crate) fn set_self_user_name(&self, name: &str) {
        self.write().self_user_name = Some(name.to_string());
    }

    /// Sets the cached pinned flag. Returns false if the id is unknown.
    pub(crate) fn set_pinned(&self, id: &str, pinned: bool) -> bool {
        match self.write().contacts.get_mut(id) {
            Some(contact) => {
                contact.set_pinned(pinned);
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_remark(&self, id: &str, remark: &str) -> bool {
        match self.write().contacts.get_mut(id) {
            Some(contact) => {
                contact.profile_mut().remark_name = remark.to_string();
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear(&self) {
        *self.write() = ContactCache::default();
    }

    fn filtered(&self, keep: impl Fn(&Contact) -> bool) -> Vec<Contact> {
        self.read()
            .contacts
            .values()
            .filter(|c| keep(c))
            .cloned()
            .collect()
    }
}

fn apply(cache: &mut ContactCache, delta: ContactDelta) -> bool {
    match delta {
        ContactDelta::Upsert(mut contact) => {
            let id = contact.id().to_string();
            // Modification records of groups often omit the member list.
            if let (Contact::Group(new), Some(Contact::Group(old))) =
                (&mut contact, cache.contacts.get(&id))
                && new.members.is_empty()
            {
                new.members = old.members.clone();
            }
            cache.contacts.insert(id, contact);
            true
        }
        ContactDelta::Remove(id) => cache.contacts.shift_remove(&id).is_some(),
    }
}

impl Client {
    /// Applies deltas and announces them. Used by the sync loop.
    pub(crate) fn apply_contact_deltas(&self, deltas: Vec<ContactDelta>) {
        if deltas.is_empty() {
            return;
        }
        let changes = self.contacts.apply_all(deltas);
        if changes.is_empty() {
            return;
        }
        debug!(
            target: "Client/Contacts",
            "{} contacts updated, {} removed",
            changes.upserted.len(),
            changes.removed.len()
        );
        self.event_bus.dispatch(&Event::ContactsChanged {
            upserted: changes.upserted,
            removed: changes.removed,
        });
    }

    /// Pins `id` to the top of the chat list. The cached flag changes only
    /// once the server accepted the change.
    pub async fn pin(&self, id: &str) -> Result<(), ClientError> {
        self.set_pinned(id, true).await
    }

    pub async fn unpin(&self, id: &str) -> Result<(), ClientError> {
        self.set_pinned(id, false).await
    }

    async fn set_pinned(&self, id: &str, pinned: bool) -> Result<(), ClientError> {
        self.ensure_known_contact(id)?;
        self.oplog(OplogRequest::new(
            self.auth_context().await?.base_request,
            id,
            OplogCommand::SetPinned(pinned),
        ))
        .await?;
        self.contacts.set_pinned(id, pinned);
        info!(target: "Client/Contacts", "{} {id}", if pinned { "Pinned" } else { "Unpinned" });
        Ok(())
    }

    /// Sets the remark name shown for a contact.
    pub async fn set_remark(&self, id: &str, remark: &str) -> Result<(), ClientError> {
        self.ensure_known_contact(id)?;
        let request = OplogRequest::new(
            self.auth_context().await?.base_request,
            id,
            OplogCommand::SetRemark,
        )
        .with_remark(remark);
        self.oplog(request).await?;
        self.contacts.set_remark(id, remark);
        Ok(())
    }

    async fn oplog(&self, request: OplogRequest) -> Result<(), ClientError> {
        let ctx = self.auth_context().await?;
        let url = with_query(
            &ctx.endpoints.oplog(),
            &[("pass_ticket", ctx.pass_ticket.clone())],
        );
        let _: OplogResponse = self.post_json(url, &request).await?;
        Ok(())
    }

    fn ensure_known_contact(&self, id: &str) -> Result<(), ClientError> {
        if id.trim().is_empty() || !self.contacts.contains(id) {
            return Err(ClientError::InvalidTarget(id.to_string()));
        }
        Ok(())
    }

    /// Fetches the full contact list page by page and upserts every entry.
    /// Contacts missing from the result are kept. Returns the number of
    /// records received.
    pub async fn refresh_contacts(&self) -> Result<usize, ClientError> {
        let ctx = self.auth_context().await?;
        let self_user_name = ctx.self_user_name.clone();
        let mut seq = 0u64;
        let mut received = 0usize;
        loop {
            let url = with_query(
                &ctx.endpoints.get_contact(),
                &[
                    ("pass_ticket", ctx.pass_ticket.clone()),
                    ("r", timestamp_ms()),
                    ("seq", seq.to_string()),
                    ("skey", ctx.base_request.skey.clone()),
                ],
            );
            let page: ContactListResponse = self.get_json(url).await?;
            received += page.member_list.len();
            let deltas = page
                .member_list
                .into_iter()
                .map(|raw| ContactDelta::Upsert(Contact::from_raw(raw, Some(&self_user_name))))
                .collect();
            self.apply_contact_deltas(deltas);

            if page.seq == 0 || page.seq == seq {
                break;
            }
            seq = page.seq;
        }
        info!(target: "Client/Contacts", "Fetched {received} contacts.");
        Ok(received)
    }

    /// Fetches full records, member lists included, for the given groups.
    pub async fn fetch_group_members(&self, ids: &[&str]) -> Result<Vec<Contact>, ClientError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(bad) = ids.iter().find(|id| id.trim().is_empty()) {
            return Err(ClientError::InvalidTarget((*bad).to_string()));
        }
        let ctx = self.auth_context().await?;
        let url = with_query(
            &ctx.endpoints.batch_get_contact(),
            &[
                ("type", "ex".to_string()),
                ("r", timestamp_ms()),
                ("pass_ticket", ctx.pass_ticket.clone()),
            ],
        );
        let body = BatchGetContactRequest {
            base_request: ctx.base_request,
            count: ids.len(),
            list: ids
                .iter()
                .map(|id| BatchContactQuery {
                    user_name: (*id).to_string(),
                    encry_chat_room_id: String::new(),
                })
                .collect(),
        };
        let reply: BatchGetContactResponse = self.post_json(url, &body).await?;
        let contacts: Vec<Contact> = reply
            .contact_list
            .into_iter()
            .map(|raw| Contact::from_raw(raw, Some(&ctx.self_user_name)))
            .collect();
        self.apply_contact_deltas(contacts.iter().cloned().map(ContactDelta::Upsert).collect());
        Ok(contacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wxcore::types::contact::{GroupMember, RawContact};

    fn contact(id: &str) -> Contact {
        Contact::from_raw(
            RawContact {
                user_name: id.into(),
                ..Default::default()
            },
            Some("@me"),
        )
    }

    #[test]
    fn snapshots_keep_insertion_order() {
        let store = ContactStore::new();
        store.set_self_user_name("@me");
        for id in ["@b", "@@g1", "@me", "@a", "@@g2"] {
            store.apply_delta(ContactDelta::Upsert(contact(id)));
        }
        // Re-upserting keeps the original position.
        store.apply_delta(ContactDelta::Upsert(contact("@b")));

        let friends: Vec<_> = store.friends().iter().map(|c| c.id().to_string()).collect();
        assert_eq!(friends, vec!["@b", "@a"]);
        let groups: Vec<_> = store.groups().iter().map(|g| g.profile.user_name.clone()).collect();
        assert_eq!(groups, vec!["@@g1", "@@g2"]);
        assert_eq!(store.self_user().unwrap().id(), "@me");
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn removal_keeps_remaining_order() {
        let store = ContactStore::new();
        let changes = store.apply_all(
            ["@a", "@b", "@c"]
                .into_iter()
                .map(|id| ContactDelta::Upsert(contact(id)))
                .chain([
                    ContactDelta::Remove("@b".into()),
                    ContactDelta::Remove("@zz".into()),
                ]),
        );
        assert_eq!(changes.upserted, vec!["@a", "@b", "@c"]);
        assert_eq!(changes.removed, vec!["@b"]);
        let ids: Vec<_> = store.all().iter().map(|c| c.id().to_string()).collect();
        assert_eq!(ids, vec!["@a", "@c"]);
    }

    #[test]
    fn group_update_without_members_keeps_them() {
        let store = ContactStore::new();
        let mut full = contact("@@g");
        if let Contact::Group(g) = &mut full {
            g.members.push(GroupMember {
                user_name: "@m".into(),
                ..Default::default()
            });
        }
        store.apply_delta(ContactDelta::Upsert(full));
        store.apply_delta(ContactDelta::Upsert(contact("@@g")));
        assert_eq!(store.groups()[0].members.len(), 1);
    }

    #[test]
    fn local_flag_changes() {
        let store = ContactStore::new();
        store.apply_delta(ContactDelta::Upsert(contact("@a")));
        assert!(store.set_pinned("@a", true));
        assert!(store.get("@a").unwrap().is_pinned());
        assert!(store.set_pinned("@a", false));
        assert!(!store.get("@a").unwrap().is_pinned());
        assert!(!store.set_pinned("@nobody", true));
    }
}
