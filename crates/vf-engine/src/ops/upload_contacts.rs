//! `upload_contacts` (§6, grounded on `backend/op/upload_contacts_op.py`).
//! Creates/updates address-book contact metadata; any contact whose
//! fingerprint (`Contact::compute_contact_id`) already matches a
//! non-removed row is skipped, and a previously-removed match is replaced
//! rather than duplicated. No ACCOUNT phase, matching the source's
//! explicit "no accounting is performed for this operation" comment.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use chrono::{DateTime, Utc};

use vf_core::clock::SharedClock;
use vf_core::errors::{error_ids, VfError};
use vf_core::types::{Contact, InvalidateContacts, InvalidateSpec};
use vf_kv::{CheckingKvClient, KvClient};

use crate::accounting::Accounting;
use crate::executor::{CheckOutcome, OpContext, OperationHandler};
use crate::notification::{NewNotification, NotificationManager};
use crate::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactUpload {
    pub name: Option<String>,
    pub identities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadContactsArgs {
    pub contacts: Vec<ContactUpload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadContactsCheckpoint {
    /// `(contact_id, replaces_removed)` pairs to insert/replace.
    to_insert: Vec<(String, ContactUpload, bool)>,
    timestamp: DateTime<Utc>,
}

pub struct UploadContactsHandler {
    args: UploadContactsArgs,
    clock: SharedClock,
}

impl UploadContactsHandler {
    pub fn new(args: UploadContactsArgs, clock: SharedClock) -> Self {
        UploadContactsHandler { args, clock }
    }
}

#[async_trait]
impl<C: KvClient> OperationHandler<C> for UploadContactsHandler {
    type Checkpoint = UploadContactsCheckpoint;

    async fn check(
        &self,
        ctx: &OpContext,
        store: &Store<CheckingKvClient<Arc<C>>>,
    ) -> Result<CheckOutcome<Self::Checkpoint>, VfError> {
        let existing = store.query_contacts(&ctx.user_id).await?;
        let by_id: BTreeMap<String, Contact> = existing.into_iter().map(|c| (c.contact_id.clone(), c)).collect();
        let mut total = by_id.values().filter(|c| !c.removed).count();

        // A batch may itself repeat the same fingerprint; only the first
        // occurrence in the request needs inserting.
        let mut seen_this_batch = std::collections::BTreeSet::new();
        let mut to_insert = Vec::new();
        for contact in &self.args.contacts {
            let contact_id = Contact::compute_contact_id(contact.name.as_deref(), &contact.identities);
            if !seen_this_batch.insert(contact_id.clone()) {
                continue;
            }
            match by_id.get(&contact_id) {
                None => {
                    to_insert.push((contact_id, contact.clone(), false));
                    total += 1;
                }
                Some(c) if c.removed => {
                    to_insert.push((contact_id, contact.clone(), true));
                    total += 1;
                }
                Some(_already_present) => {}
            }
        }

        if total > Contact::MAX_CONTACTS_LIMIT {
            return Err(VfError::limit_exceeded(
                error_ids::UPLOAD_CONTACTS_EXCEEDS_LIMIT,
                format!("upload would bring contact count to {total}, max is {}", Contact::MAX_CONTACTS_LIMIT),
            ));
        }

        Ok(CheckOutcome::Proceed(UploadContactsCheckpoint { to_insert, timestamp: self.clock.now() }))
    }

    async fn update(&self, ctx: &OpContext, store: &Store<C>, checkpoint: &Self::Checkpoint) -> Result<(), VfError> {
        for (contact_id, contact, _replaces_removed) in &checkpoint.to_insert {
            store
                .put_contact(&Contact {
                    user_id: ctx.user_id.clone(),
                    contact_id: contact_id.clone(),
                    name: contact.name.clone(),
                    identities: contact.identities.clone(),
                    removed: false,
                    timestamp: checkpoint.timestamp,
                })
                .await?;
        }
        Ok(())
    }

    async fn account(&self, _ctx: &OpContext, _store: &Store<C>, _checkpoint: &Self::Checkpoint, _acc: &mut Accounting<C>) -> Result<(), VfError> {
        Ok(())
    }

    async fn notify(
        &self,
        ctx: &OpContext,
        _store: &Store<C>,
        checkpoint: &Self::Checkpoint,
        notifier: &NotificationManager<C>,
    ) -> Result<(), VfError> {
        if checkpoint.to_insert.is_empty() {
            return Ok(());
        }
        notifier
            .notify(NewNotification {
                user_id: ctx.user_id.clone(),
                name: "upload_contacts".to_string(),
                op_id: Some(ctx.operation_id.clone()),
                sender_id: Some(ctx.user_id.clone()),
                sender_device_id: Some(ctx.device_id),
                timestamp: checkpoint.timestamp,
                invalidate: InvalidateSpec { contacts: Some(InvalidateContacts { start_key: None }), ..Default::default() },
                viewpoint_id: None,
                activity_id: None,
                update_seq: None,
                viewed_seq: None,
                clear_badge: false,
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vf_core::clock::TestClock;
    use vf_kv::InMemoryKv;

    use crate::executor::{ExecutionOutcome, FourPhaseExecutor};
    use crate::failpoint::FailpointRegistry;

    fn op_row() -> vf_core::types::Operation {
        vf_core::types::Operation::new("1".into(), "o-1-1".into(), 1, "upload_contacts", serde_json::json!({}), chrono::Utc::now())
    }

    #[tokio::test]
    async fn uploading_a_new_contact_inserts_it_and_notifies() {
        let store = Arc::new(Store::new(Arc::new(InMemoryKv::new())));
        let args = UploadContactsArgs { contacts: vec![ContactUpload { name: Some("Alice".into()), identities: vec!["Email:alice@example.com".into()] }] };
        let handler = UploadContactsHandler::new(args, Arc::new(TestClock::at_micros(0)));
        let executor = FourPhaseExecutor::new(store.clone(), Arc::new(FailpointRegistry::new()));
        let mut row = op_row();
        let outcome = executor.execute(&handler, &mut row).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed));

        let contacts = store.query_contacts(&"1".to_string()).await.unwrap();
        assert_eq!(contacts.len(), 1);
        assert!(store.get_notification(&"1".to_string(), 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn re_uploading_the_same_contact_is_a_no_op() {
        let store = Arc::new(Store::new(Arc::new(InMemoryKv::new())));
        let args = UploadContactsArgs { contacts: vec![ContactUpload { name: Some("Alice".into()), identities: vec!["Email:alice@example.com".into()] }] };
        let handler = UploadContactsHandler::new(args.clone(), Arc::new(TestClock::at_micros(0)));
        let executor = FourPhaseExecutor::new(store.clone(), Arc::new(FailpointRegistry::new()));
        let mut row = op_row();
        executor.execute(&handler, &mut row).await.unwrap();

        let handler2 = UploadContactsHandler::new(args, Arc::new(TestClock::at_micros(0)));
        let mut row2 = vf_core::types::Operation::new("1".into(), "o-1-2".into(), 1, "upload_contacts", serde_json::json!({}), chrono::Utc::now());
        executor.execute(&handler2, &mut row2).await.unwrap();

        let contacts = store.query_contacts(&"1".to_string()).await.unwrap();
        assert_eq!(contacts.len(), 1);
        // second upload found nothing new to insert, so no second notification
        assert!(store.get_notification(&"1".to_string(), 2).await.unwrap().is_none());
    }
}
