//! Packet store administration
//!
//! Lifecycle and housekeeping commands over the store table: create, delete,
//! resize, retype, change of virtual channel, storage enable/disable, content
//! deletion and the configuration, content and status reports. Each command
//! yields one start outcome and, when started, one completion outcome.

use std::collections::BTreeSet;

use log::{info, warn};
use puslibgs::{
    DeleteRange, ErrorCode, PusError, PusResult, RequestId, ResourceError, RetrievalState,
    StorageCommand, StoreId, StoreKind, StoreSelection, StoreSpec, Telemetry, ValidationError,
    VirtualChannel, MAX_STORES, MAX_STORE_CAPACITY,
};

use crate::outbox::Outbox;
use crate::store::{PacketStore, StoreTable};

pub struct PacketStoreManager {
    max_stores: usize,
}

impl PacketStoreManager {
    /// Limits the table to `max_stores`, never more than [`MAX_STORES`]
    pub fn new(max_stores: usize) -> Self {
        Self {
            max_stores: max_stores.min(MAX_STORES),
        }
    }

    pub fn max_stores(&self) -> usize {
        self.max_stores
    }

    /// Load the initial store table. Checked like a create command.
    pub fn import(&self, table: &mut StoreTable, specs: Vec<StoreSpec>) -> PusResult<()> {
        self.check_create(table, &specs)?;
        for spec in specs {
            info!(
                "Imported packet store {} ({:?}, {} bytes, {})",
                spec.id, spec.kind, spec.capacity_bytes, spec.virtual_channel
            );
            table.insert(PacketStore::from_spec(spec));
        }
        Ok(())
    }

    /// Execute an administrative command. Retrieval commands are not handled
    /// here and are failed at start.
    pub fn execute(
        &self,
        table: &mut StoreTable,
        request: RequestId,
        command: StorageCommand,
        out: &mut Outbox,
    ) {
        match command {
            StorageCommand::Create(specs) => self.create(table, request, specs, out),
            StorageCommand::Delete(ids) => delete(table, request, &ids, out),
            StorageCommand::Resize { id, capacity } => resize(table, request, &id, capacity, out),
            StorageCommand::ChangeType { id, kind } => change_type(table, request, &id, kind, out),
            StorageCommand::ChangeVirtualChannel { id, vc } => {
                change_virtual_channel(table, request, &id, vc, out)
            }
            StorageCommand::EnableStorage(selection) => {
                set_storage(table, request, &selection, true, out)
            }
            StorageCommand::DisableStorage(selection) => {
                set_storage(table, request, &selection, false, out)
            }
            StorageCommand::DeleteContent { id, range } => {
                delete_content(table, request, &id, range, out)
            }
            StorageCommand::ReportConfiguration => {
                out.started(request);
                out.report(Telemetry::Configuration(
                    table.iter().map(PacketStore::configuration).collect(),
                ));
                out.completed(request);
            }
            StorageCommand::ReportStatus => {
                out.started(request);
                out.report(Telemetry::Status(table.iter().map(PacketStore::status).collect()));
                out.completed(request);
            }
            StorageCommand::ReportContentSummary(selection) => {
                report_content_summary(table, request, &selection, out)
            }
            other => {
                warn!("{:?} is not an administrative command", other.subtype());
                out.start_failed(request, ErrorCode::InvalidField);
            }
        }
    }

    fn check_create(&self, table: &StoreTable, specs: &[StoreSpec]) -> PusResult<()> {
        let mut batch = BTreeSet::new();
        for spec in specs {
            if spec.id.has_wildcard() {
                return Err(ValidationError::WildcardInStoreId(spec.id.clone()).into());
            }
            if spec.capacity_bytes == 0 {
                return Err(ValidationError::ZeroCapacity(spec.id.clone()).into());
            }
            if spec.capacity_bytes > MAX_STORE_CAPACITY {
                return Err(ValidationError::InvalidField("capacity").into());
            }
            if table.contains(&spec.id) || !batch.insert(&spec.id) {
                return Err(ValidationError::DuplicateStoreId(spec.id.clone()).into());
            }
        }
        if table.len() + specs.len() > self.max_stores {
            return Err(ResourceError::TooManyStores(self.max_stores).into());
        }
        Ok(())
    }

    fn create(&self, table: &mut StoreTable, request: RequestId, specs: Vec<StoreSpec>, out: &mut Outbox) {
        if out.start(request, self.check_create(table, &specs)).is_none() {
            return;
        }
        for spec in specs {
            info!(
                "Created packet store {} ({:?}, {} bytes, {})",
                spec.id, spec.kind, spec.capacity_bytes, spec.virtual_channel
            );
            table.insert(PacketStore::from_spec(spec));
        }
        out.completed(request);
    }
}

fn check_delete(table: &StoreTable, ids: &[StoreId]) -> PusResult<()> {
    for id in ids {
        let store = table.lookup(id)?;
        if store.retrieval() != RetrievalState::Closed {
            return Err(ResourceError::RetrievalNotClosed(id.clone()).into());
        }
        if store.time_range().is_some() {
            return Err(ResourceError::RetrievalInProgress(id.clone()).into());
        }
    }
    Ok(())
}

fn delete(table: &mut StoreTable, request: RequestId, ids: &[StoreId], out: &mut Outbox) {
    if out.start(request, check_delete(table, ids)).is_none() {
        return;
    }
    for id in ids {
        if table.remove(id).is_some() {
            info!("Deleted packet store {}", id);
        }
    }
    out.completed(request);
}

fn resize(table: &mut StoreTable, request: RequestId, id: &StoreId, capacity: usize, out: &mut Outbox) {
    let check = table.lookup_closed(id).and_then(|store| {
        if capacity == 0 {
            return Err(ValidationError::ZeroCapacity(id.clone()).into());
        }
        if capacity > MAX_STORE_CAPACITY {
            return Err(ValidationError::InvalidField("capacity").into());
        }
        if capacity < store.used_bytes() {
            return Err(PusError::from(ResourceError::CapacityBelowUsage {
                id: id.clone(),
                used: store.used_bytes(),
                capacity,
            }));
        }
        Ok(store)
    });
    let Some(store) = out.start(request, check) else {
        return;
    };
    match store.resize(capacity) {
        Ok(()) => {
            info!("Packet store {} resized to {} bytes", id, capacity);
            out.completed(request);
        }
        Err(e) => out.completion_failed(request, e.error_code()),
    }
}

fn change_type(table: &mut StoreTable, request: RequestId, id: &StoreId, kind: StoreKind, out: &mut Outbox) {
    let Some(store) = out.start(request, table.lookup_closed(id)) else {
        return;
    };
    store.set_kind(kind);
    info!("Packet store {} is now {:?}", id, kind);
    out.completed(request);
}

fn change_virtual_channel(
    table: &mut StoreTable,
    request: RequestId,
    id: &StoreId,
    vc: VirtualChannel,
    out: &mut Outbox,
) {
    let Some(store) = out.start(request, table.lookup_closed(id)) else {
        return;
    };
    store.set_virtual_channel(vc);
    info!("Packet store {} now plays back on {}", id, vc);
    out.completed(request);
}

/// Known stores are switched even when others in the batch are unknown
fn set_storage(
    table: &mut StoreTable,
    request: RequestId,
    selection: &StoreSelection,
    enabled: bool,
    out: &mut Outbox,
) {
    let (known, unknown) = table.resolve(selection);
    out.started(request);
    for id in &known {
        if let Some(store) = table.get_mut(id) {
            store.set_storage_enabled(enabled);
            info!(
                "Storage {} for packet store {}",
                if enabled { "enabled" } else { "disabled" },
                id
            );
        }
    }
    if unknown.is_empty() {
        out.completed(request);
    } else {
        for id in &unknown {
            warn!("Cannot switch storage of unknown packet store {}", id);
        }
        out.completion_failed_with(
            request,
            ErrorCode::UnknownStoreId,
            StoreSelection::Ids(unknown).to_bytes(),
        );
    }
}

fn delete_content(
    table: &mut StoreTable,
    request: RequestId,
    id: &StoreId,
    range: DeleteRange,
    out: &mut Outbox,
) {
    let Some(store) = out.start(request, table.lookup_mut(id)) else {
        return;
    };
    store.delete_content(range);
    out.completed(request);
}

fn report_content_summary(
    table: &StoreTable,
    request: RequestId,
    selection: &StoreSelection,
    out: &mut Outbox,
) {
    let (known, unknown) = table.resolve(selection);
    let check = match unknown.into_iter().next() {
        Some(id) => Err(ValidationError::UnknownStoreId(id)),
        None => Ok(known),
    };
    let Some(ids) = out.start(request, check) else {
        return;
    };
    for id in &ids {
        if let Some(store) = table.get(id) {
            out.report(Telemetry::ContentSummary(store.summary()));
        }
    }
    out.completed(request);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::Output;
    use puslibgs::{OnboardTime, VerificationOutcome};

    fn id(s: &str) -> StoreId {
        StoreId::new(s).unwrap()
    }

    fn spec(s: &str, capacity: usize) -> StoreSpec {
        StoreSpec::new(id(s), capacity, StoreKind::Bounded, VirtualChannel(1))
    }

    fn request() -> RequestId {
        RequestId { apid: 1, sequence_count: 9 }
    }

    fn outcomes(out: Outbox) -> Vec<VerificationOutcome> {
        out.into_outputs()
            .into_iter()
            .filter_map(|o| match o {
                Output::Verification { outcome, .. } => Some(outcome),
                _ => None,
            })
            .collect()
    }

    fn run(manager: &PacketStoreManager, table: &mut StoreTable, cmd: StorageCommand) -> Vec<VerificationOutcome> {
        let mut out = Outbox::new();
        manager.execute(table, request(), cmd, &mut out);
        outcomes(out)
    }

    fn setup() -> (PacketStoreManager, StoreTable) {
        let manager = PacketStoreManager::new(4);
        let mut table = StoreTable::new();
        manager.import(&mut table, vec![spec("S", 100)]).unwrap();
        (manager, table)
    }

    #[test]
    fn test_create_resize_delete() {
        let (manager, mut table) = setup();
        let ok = vec![VerificationOutcome::StartOk, VerificationOutcome::CompletionOk];

        assert_eq!(run(&manager, &mut table, StorageCommand::Create(vec![spec("T", 10)])), ok);
        assert_eq!(
            run(&manager, &mut table, StorageCommand::Resize { id: id("T"), capacity: 20 }),
            ok
        );
        assert_eq!(table.get(&id("T")).unwrap().capacity_bytes(), 20);
        assert_eq!(run(&manager, &mut table, StorageCommand::Delete(vec![id("T")])), ok);
        assert!(!table.contains(&id("T")));
    }

    #[test]
    fn test_create_rejections() {
        let (manager, mut table) = setup();
        let cases = [
            (vec![spec("S", 10)], ErrorCode::DuplicateStoreId),
            (vec![spec("A", 10), spec("A", 10)], ErrorCode::DuplicateStoreId),
            (vec![spec("A*", 10)], ErrorCode::WildcardInStoreId),
            (vec![spec("A", 0)], ErrorCode::ZeroCapacity),
            (
                vec![spec("A", 1), spec("B", 1), spec("C", 1), spec("D", 1)],
                ErrorCode::TooManyStores,
            ),
        ];
        for (specs, code) in cases {
            assert_eq!(
                run(&manager, &mut table, StorageCommand::Create(specs)),
                vec![VerificationOutcome::StartFail(code)]
            );
        }
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_exclusive_operations_need_closed_retrieval() {
        let (manager, mut table) = setup();
        table.get_mut(&id("S")).unwrap().set_retrieval(RetrievalState::Open);
        let fail = vec![VerificationOutcome::StartFail(ErrorCode::RetrievalNotClosed)];

        for cmd in [
            StorageCommand::Resize { id: id("S"), capacity: 50 },
            StorageCommand::ChangeType { id: id("S"), kind: StoreKind::Circular },
            StorageCommand::ChangeVirtualChannel { id: id("S"), vc: VirtualChannel(7) },
            StorageCommand::Delete(vec![id("S")]),
        ] {
            assert_eq!(run(&manager, &mut table, cmd), fail);
        }
        let store = table.get(&id("S")).unwrap();
        assert_eq!(store.capacity_bytes(), 100);
        assert_eq!(store.kind(), StoreKind::Bounded);
    }

    #[test]
    fn test_resize_limits() {
        let (manager, mut table) = setup();
        table
            .get_mut(&id("S"))
            .unwrap()
            .store(OnboardTime(1), vec![0; 40])
            .unwrap();
        assert_eq!(
            run(&manager, &mut table, StorageCommand::Resize { id: id("S"), capacity: 0 }),
            vec![VerificationOutcome::StartFail(ErrorCode::ZeroCapacity)]
        );
        assert_eq!(
            run(&manager, &mut table, StorageCommand::Resize { id: id("S"), capacity: 39 }),
            vec![VerificationOutcome::StartFail(ErrorCode::CapacityBelowUsage)]
        );
    }

    #[test]
    fn test_storage_batch_failure_names_unknown_ids() {
        let (manager, mut table) = setup();
        let mut out = Outbox::new();
        manager.execute(
            &mut table,
            request(),
            StorageCommand::EnableStorage(StoreSelection::Ids(vec![id("X"), id("S"), id("YZ")])),
            &mut out,
        );
        assert_eq!(
            out.into_outputs().last(),
            Some(&Output::Verification {
                request: request(),
                outcome: VerificationOutcome::CompletionFail(ErrorCode::UnknownStoreId),
                failure_data: vec![2, 1, b'X', 2, b'Y', b'Z'],
            })
        );
    }

    #[test]
    fn test_max_stores_is_clamped() {
        assert_eq!(PacketStoreManager::new(1000).max_stores(), MAX_STORES);
        assert_eq!(PacketStoreManager::new(4).max_stores(), 4);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_capacity_beyond_size_field_rejected() {
        let (manager, mut table) = setup();
        let fail = vec![VerificationOutcome::StartFail(ErrorCode::InvalidField)];
        assert_eq!(
            run(&manager, &mut table, StorageCommand::Create(vec![spec("BIG", MAX_STORE_CAPACITY + 1)])),
            fail
        );
        assert_eq!(
            run(
                &manager,
                &mut table,
                StorageCommand::Resize { id: id("S"), capacity: MAX_STORE_CAPACITY + 1 }
            ),
            fail
        );
        assert_eq!(table.get(&id("S")).unwrap().capacity_bytes(), 100);
    }

    #[test]
    fn test_delete_unknown_is_all_or_nothing() {
        let (manager, mut table) = setup();
        assert_eq!(
            run(&manager, &mut table, StorageCommand::Delete(vec![id("S"), id("X")])),
            vec![VerificationOutcome::StartFail(ErrorCode::UnknownStoreId)]
        );
        assert!(table.contains(&id("S")));
    }

    #[test]
    fn test_storage_batch_partial_success() {
        let (manager, mut table) = setup();
        let outcomes = run(
            &manager,
            &mut table,
            StorageCommand::DisableStorage(StoreSelection::Ids(vec![id("S"), id("X")])),
        );
        assert_eq!(
            outcomes,
            vec![
                VerificationOutcome::StartOk,
                VerificationOutcome::CompletionFail(ErrorCode::UnknownStoreId)
            ]
        );
        assert!(!table.get(&id("S")).unwrap().storage_enabled());

        run(&manager, &mut table, StorageCommand::EnableStorage(StoreSelection::All));
        assert!(table.get(&id("S")).unwrap().storage_enabled());
    }

    #[test]
    fn test_reports() {
        let (manager, mut table) = setup();
        let mut out = Outbox::new();
        manager.execute(&mut table, request(), StorageCommand::ReportConfiguration, &mut out);
        manager.execute(
            &mut table,
            request(),
            StorageCommand::ReportContentSummary(StoreSelection::All),
            &mut out,
        );
        let reports: Vec<_> = out
            .into_outputs()
            .into_iter()
            .filter(|o| matches!(o, Output::Report(_)))
            .collect();
        assert_eq!(reports.len(), 2);

        assert_eq!(
            run(
                &manager,
                &mut table,
                StorageCommand::ReportContentSummary(StoreSelection::Ids(vec![id("X")]))
            ),
            vec![VerificationOutcome::StartFail(ErrorCode::UnknownStoreId)]
        );
    }

    #[test]
    fn test_import_rejects_duplicates() {
        let (manager, mut table) = setup();
        assert!(manager.import(&mut table, vec![spec("S", 5)]).is_err());
    }
}
