//! Retrieval engine
//!
//! Open retrieval plays a store back entry by entry, one entry per tick, while
//! its state is `Open`. By-time-range retrieval walks the same log with its own
//! index and keeps its request in flight until the window is exhausted or the
//! scan is aborted. Copy-in-window moves a window of one store into another.
//! The engine also stores incoming packets.

use log::{debug, info, trace, warn};
use puslibgs::{
    ErrorCode, OnboardTime, PacketCodec, PusError, RequestId, ResourceError, RetrievalState,
    StorageCommand, StoreId, ValidationError,
};

use crate::outbox::Outbox;
use crate::store::{StoreTable, TimeRangeScan};

#[derive(Debug, Default)]
pub struct RetrievalEngine {
    delivered: u64,
}

impl RetrievalEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries delivered on any virtual channel since start-up
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Execute a retrieval command. Administrative commands are not handled
    /// here and are failed at start.
    pub fn execute(
        &mut self,
        table: &mut StoreTable,
        request: RequestId,
        command: StorageCommand,
        out: &mut Outbox,
    ) {
        match command {
            StorageCommand::EnableRetrieval(id) => enable(table, request, &id, out),
            StorageCommand::DisableRetrieval(id) => disable(table, request, &id, out),
            StorageCommand::SuspendRetrieval(id) => transition(
                table,
                request,
                &id,
                RetrievalState::Open,
                RetrievalState::Suspended,
                out,
            ),
            StorageCommand::ResumeRetrieval(id) => transition(
                table,
                request,
                &id,
                RetrievalState::Suspended,
                RetrievalState::Open,
                out,
            ),
            StorageCommand::ChangeStartTime { id, time } => {
                change_start_time(table, request, &id, time, out)
            }
            StorageCommand::StartByTimeRange { id, from, to } => {
                start_by_time_range(table, request, &id, from, to, out)
            }
            StorageCommand::AbortByTimeRange(id) => abort_by_time_range(table, request, &id, out),
            StorageCommand::CopyInWindow { src, dst, from, to } => {
                copy_in_window(table, request, &src, &dst, from, to, out)
            }
            other => {
                warn!("{:?} is not a retrieval command", other.subtype());
                out.start_failed(request, ErrorCode::InvalidField);
            }
        }
    }

    /// Store a packet in every store that takes it
    pub fn ingest(&mut self, table: &mut StoreTable, bytes: &[u8], now: OnboardTime, out: &mut Outbox) {
        let apid = PacketCodec::raw_apid(bytes);
        for store in table.iter_mut().filter(|s| s.accepts(apid)) {
            if let Err(e) = store.store(now, bytes.to_vec()) {
                warn!("Packet not stored: {}", e);
                out.storing_failure(PacketCodec::raw_header(bytes), e.error_code());
            }
        }
    }

    /// Deliver at most one entry per open retrieval and per time-range scan
    pub fn tick(&mut self, table: &mut StoreTable, out: &mut Outbox) {
        for store in table.iter_mut() {
            let vc = store.virtual_channel();

            if let Some((time, bytes)) = store.next_open_entry().map(|e| (e.time, e.bytes.clone())) {
                trace!("Open retrieval of {}: entry at {} on {}", store.id(), time, vc);
                out.playback(vc, bytes);
                self.delivered += 1;
            }

            let Some(scan) = store.time_range().cloned() else {
                continue;
            };
            let next = (scan.next < scan.end)
                .then(|| store.entry(scan.next))
                .flatten()
                .map(|e| e.bytes.clone());
            if let Some(bytes) = next {
                out.playback(vc, bytes);
                out.progress(scan.request, scan.step);
                self.delivered += 1;
                if let Some(scan) = store.time_range_mut() {
                    scan.next += 1;
                    scan.step = scan.step.wrapping_add(1);
                }
            }

            let exhausted = store
                .time_range()
                .map_or(false, |s| s.next >= s.end);
            if exhausted {
                if let Some(done) = store.end_time_range() {
                    info!("Time-range retrieval of {} finished", store.id());
                    out.completed(done.request);
                }
            }
        }
    }
}

fn enable(table: &mut StoreTable, request: RequestId, id: &StoreId, out: &mut Outbox) {
    let check = table.lookup_mut(id).map_err(PusError::from).and_then(|store| {
        if store.retrieval() != RetrievalState::Closed {
            return Err(ResourceError::InvalidRetrievalState(id.clone()).into());
        }
        Ok(store)
    });
    let Some(store) = out.start(request, check) else {
        return;
    };
    let cursor = store
        .take_start_time()
        .map_or(0, |time| store.first_at_or_after(time));
    store.set_cursor(cursor);
    store.set_retrieval(RetrievalState::Open);
    info!("Open retrieval of {} enabled at entry {}", id, cursor);
    out.completed(request);
}

fn disable(table: &mut StoreTable, request: RequestId, id: &StoreId, out: &mut Outbox) {
    let Some(store) = out.start(request, table.lookup_mut(id)) else {
        return;
    };
    store.set_retrieval(RetrievalState::Closed);
    store.set_cursor(0);
    store.set_start_time(None);
    info!("Open retrieval of {} disabled", id);
    out.completed(request);
}

fn transition(
    table: &mut StoreTable,
    request: RequestId,
    id: &StoreId,
    from: RetrievalState,
    to: RetrievalState,
    out: &mut Outbox,
) {
    let check = table.lookup_mut(id).map_err(PusError::from).and_then(|store| {
        if store.retrieval() != from {
            return Err(ResourceError::InvalidRetrievalState(id.clone()).into());
        }
        Ok(store)
    });
    let Some(store) = out.start(request, check) else {
        return;
    };
    store.set_retrieval(to);
    info!("Open retrieval of {} is now {:?} at entry {}", id, to, store.cursor());
    out.completed(request);
}

/// While closed the time applies at the next enable, while suspended it moves
/// the cursor immediately
fn change_start_time(
    table: &mut StoreTable,
    request: RequestId,
    id: &StoreId,
    time: OnboardTime,
    out: &mut Outbox,
) {
    let check = table.lookup_mut(id).map_err(PusError::from).and_then(|store| {
        if store.retrieval() == RetrievalState::Open {
            return Err(ResourceError::InvalidRetrievalState(id.clone()).into());
        }
        Ok(store)
    });
    let Some(store) = out.start(request, check) else {
        return;
    };
    match store.retrieval() {
        RetrievalState::Suspended => {
            let cursor = store.first_at_or_after(time);
            store.set_cursor(cursor);
            debug!("Open retrieval of {} moved to entry {}", id, cursor);
        }
        _ => store.set_start_time(Some(time)),
    }
    out.completed(request);
}

fn start_by_time_range(
    table: &mut StoreTable,
    request: RequestId,
    id: &StoreId,
    from: OnboardTime,
    to: OnboardTime,
    out: &mut Outbox,
) {
    let check = table.lookup_mut(id).map_err(PusError::from).and_then(|store| {
        if store.time_range().is_some() {
            return Err(ResourceError::RetrievalInProgress(id.clone()).into());
        }
        Ok(store)
    });
    let Some(store) = out.start(request, check) else {
        return;
    };
    let window = store.window(from, to);
    if window.is_empty() {
        debug!("Time-range retrieval of {}: nothing between {} and {}", id, from, to);
        out.completed(request);
        return;
    }
    info!(
        "Time-range retrieval of {}: {} entries between {} and {}",
        id,
        window.len(),
        from,
        to
    );
    store.begin_time_range(TimeRangeScan {
        request,
        next: window.start,
        end: window.end,
        step: 0,
    });
}

fn abort_by_time_range(table: &mut StoreTable, request: RequestId, id: &StoreId, out: &mut Outbox) {
    let check = table.lookup_mut(id).map_err(PusError::from).and_then(|store| {
        if store.time_range().is_none() {
            return Err(ResourceError::NoRetrievalInProgress(id.clone()).into());
        }
        Ok(store)
    });
    let Some(store) = out.start(request, check) else {
        return;
    };
    if let Some(scan) = store.end_time_range() {
        info!("Time-range retrieval of {} aborted", id);
        out.completion_failed(scan.request, ResourceError::Aborted.error_code());
    }
    out.completed(request);
}

/// Entries copied before an overflow stay in the destination
fn copy_in_window(
    table: &mut StoreTable,
    request: RequestId,
    src: &StoreId,
    dst: &StoreId,
    from: OnboardTime,
    to: OnboardTime,
    out: &mut Outbox,
) {
    let check = if src == dst {
        Err(PusError::from(ValidationError::SameSourceAndDestination(src.clone())))
    } else {
        table
            .lookup(dst)
            .and_then(|_| table.lookup(src))
            .map(|store| {
                store
                    .window(from, to)
                    .filter_map(|i| store.entry(i).cloned())
                    .collect::<Vec<_>>()
            })
            .map_err(PusError::from)
    };
    let Some(entries) = out.start(request, check) else {
        return;
    };
    let Ok(store) = table.lookup_mut(dst) else {
        out.completion_failed(request, ErrorCode::UnknownStoreId);
        return;
    };
    for (step, entry) in entries.into_iter().enumerate() {
        if let Err(e) = store.store(entry.time, entry.bytes) {
            warn!("Copy from {} to {} stopped after {} entries: {}", src, dst, step, e);
            out.completion_failed(request, e.error_code());
            return;
        }
        out.progress(request, step as u16);
    }
    info!("Copied window {}..={} from {} to {}", from, to, src, dst);
    out.completed(request);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::Output;
    use crate::store::PacketStore;
    use puslibgs::{StoreKind, StoreSpec, VerificationOutcome, VirtualChannel};

    fn id(s: &str) -> StoreId {
        StoreId::new(s).unwrap()
    }

    fn request(seq: u16) -> RequestId {
        RequestId { apid: 1, sequence_count: seq }
    }

    fn table_with(entries: &[u64]) -> StoreTable {
        let mut table = StoreTable::new();
        let mut store = PacketStore::from_spec(StoreSpec::new(
            id("S"),
            1000,
            StoreKind::Circular,
            VirtualChannel(2),
        ));
        for &t in entries {
            store.store(OnboardTime(t), vec![t as u8; 4]).unwrap();
        }
        table.insert(store);
        table
    }

    fn exec(engine: &mut RetrievalEngine, table: &mut StoreTable, seq: u16, cmd: StorageCommand) -> Vec<Output> {
        let mut out = Outbox::new();
        engine.execute(table, request(seq), cmd, &mut out);
        out.into_outputs()
    }

    fn tick(engine: &mut RetrievalEngine, table: &mut StoreTable) -> Vec<Output> {
        let mut out = Outbox::new();
        engine.tick(table, &mut out);
        out.into_outputs()
    }

    fn verification(seq: u16, outcome: VerificationOutcome) -> Output {
        Output::Verification { request: request(seq), outcome, failure_data: vec![] }
    }

    fn playback(t: u64) -> Output {
        Output::Playback { vc: VirtualChannel(2), bytes: vec![t as u8; 4] }
    }

    #[test]
    fn test_open_retrieval_drains_then_idles() {
        let mut engine = RetrievalEngine::new();
        let mut table = table_with(&[1, 2, 3]);
        exec(&mut engine, &mut table, 1, StorageCommand::EnableRetrieval(id("S")));

        for t in 1..=3 {
            assert_eq!(tick(&mut engine, &mut table), vec![playback(t)]);
        }
        assert!(tick(&mut engine, &mut table).is_empty());
        assert_eq!(engine.delivered(), 3);

        let mut out = Outbox::new();
        engine.ingest(&mut table, &[4; 4], OnboardTime(4), &mut out);
        assert!(out.is_empty());
        assert_eq!(tick(&mut engine, &mut table), vec![playback(4)]);
    }

    #[test]
    fn test_state_machine_rejections() {
        let mut engine = RetrievalEngine::new();
        let mut table = table_with(&[]);
        let invalid = VerificationOutcome::StartFail(ErrorCode::InvalidRetrievalState);

        assert_eq!(
            exec(&mut engine, &mut table, 1, StorageCommand::SuspendRetrieval(id("S"))),
            vec![verification(1, invalid)]
        );
        assert_eq!(
            exec(&mut engine, &mut table, 2, StorageCommand::ResumeRetrieval(id("S"))),
            vec![verification(2, invalid)]
        );
        exec(&mut engine, &mut table, 3, StorageCommand::EnableRetrieval(id("S")));
        assert_eq!(
            exec(&mut engine, &mut table, 4, StorageCommand::EnableRetrieval(id("S"))),
            vec![verification(4, invalid)]
        );
        assert_eq!(
            exec(
                &mut engine,
                &mut table,
                5,
                StorageCommand::ChangeStartTime { id: id("S"), time: OnboardTime(0) }
            ),
            vec![verification(5, invalid)]
        );
        assert_eq!(
            exec(&mut engine, &mut table, 6, StorageCommand::EnableRetrieval(id("X"))),
            vec![verification(6, VerificationOutcome::StartFail(ErrorCode::UnknownStoreId))]
        );
    }

    #[test]
    fn test_start_time_applies_on_enable() {
        let mut engine = RetrievalEngine::new();
        let mut table = table_with(&[10, 20, 30]);
        exec(
            &mut engine,
            &mut table,
            1,
            StorageCommand::ChangeStartTime { id: id("S"), time: OnboardTime(15) },
        );
        exec(&mut engine, &mut table, 2, StorageCommand::EnableRetrieval(id("S")));
        assert_eq!(table.get(&id("S")).unwrap().cursor(), 1);

        exec(&mut engine, &mut table, 3, StorageCommand::DisableRetrieval(id("S")));
        exec(&mut engine, &mut table, 4, StorageCommand::EnableRetrieval(id("S")));
        assert_eq!(table.get(&id("S")).unwrap().cursor(), 0);
    }

    #[test]
    fn test_change_start_time_while_suspended() {
        let mut engine = RetrievalEngine::new();
        let mut table = table_with(&[10, 20, 30]);
        exec(&mut engine, &mut table, 1, StorageCommand::EnableRetrieval(id("S")));
        exec(&mut engine, &mut table, 2, StorageCommand::SuspendRetrieval(id("S")));
        assert!(tick(&mut engine, &mut table).is_empty());
        exec(
            &mut engine,
            &mut table,
            3,
            StorageCommand::ChangeStartTime { id: id("S"), time: OnboardTime(30) },
        );
        exec(&mut engine, &mut table, 4, StorageCommand::ResumeRetrieval(id("S")));
        assert_eq!(tick(&mut engine, &mut table), vec![playback(30)]);
    }

    #[test]
    fn test_time_range_retrieval() {
        let mut engine = RetrievalEngine::new();
        let mut table = table_with(&[10, 20, 30, 40]);
        let outputs = exec(
            &mut engine,
            &mut table,
            7,
            StorageCommand::StartByTimeRange { id: id("S"), from: OnboardTime(15), to: OnboardTime(30) },
        );
        assert_eq!(outputs, vec![verification(7, VerificationOutcome::StartOk)]);

        assert_eq!(
            tick(&mut engine, &mut table),
            vec![playback(20), verification(7, VerificationOutcome::ProgressOk(0))]
        );
        assert_eq!(
            tick(&mut engine, &mut table),
            vec![
                playback(30),
                verification(7, VerificationOutcome::ProgressOk(1)),
                verification(7, VerificationOutcome::CompletionOk),
            ]
        );
        assert!(tick(&mut engine, &mut table).is_empty());
        assert_eq!(table.get(&id("S")).unwrap().entry_count(), 4);
    }

    #[test]
    fn test_empty_time_range_completes_at_once() {
        let mut engine = RetrievalEngine::new();
        let mut table = table_with(&[10]);
        let outputs = exec(
            &mut engine,
            &mut table,
            1,
            StorageCommand::StartByTimeRange { id: id("S"), from: OnboardTime(50), to: OnboardTime(60) },
        );
        assert_eq!(
            outputs,
            vec![
                verification(1, VerificationOutcome::StartOk),
                verification(1, VerificationOutcome::CompletionOk)
            ]
        );
    }

    #[test]
    fn test_abort_time_range() {
        let mut engine = RetrievalEngine::new();
        let mut table = table_with(&[10, 20, 30]);
        let range = StorageCommand::StartByTimeRange {
            id: id("S"),
            from: OnboardTime(0),
            to: OnboardTime(100),
        };
        exec(&mut engine, &mut table, 1, range.clone());
        tick(&mut engine, &mut table);

        assert_eq!(
            exec(&mut engine, &mut table, 2, range),
            vec![verification(2, VerificationOutcome::StartFail(ErrorCode::RetrievalInProgress))]
        );
        assert_eq!(
            exec(&mut engine, &mut table, 3, StorageCommand::AbortByTimeRange(id("S"))),
            vec![
                verification(3, VerificationOutcome::StartOk),
                verification(1, VerificationOutcome::CompletionFail(ErrorCode::Aborted)),
                verification(3, VerificationOutcome::CompletionOk),
            ]
        );
        assert!(tick(&mut engine, &mut table).is_empty());
        assert_eq!(
            exec(&mut engine, &mut table, 4, StorageCommand::AbortByTimeRange(id("S"))),
            vec![verification(4, VerificationOutcome::StartFail(ErrorCode::NoRetrievalInProgress))]
        );
    }

    #[test]
    fn test_copy_in_window_overflow_keeps_copied() {
        let mut engine = RetrievalEngine::new();
        let mut table = table_with(&[10, 20, 30]);
        table.insert(PacketStore::from_spec(StoreSpec::new(
            id("D"),
            8,
            StoreKind::Bounded,
            VirtualChannel(3),
        )));

        let outputs = exec(
            &mut engine,
            &mut table,
            1,
            StorageCommand::CopyInWindow {
                src: id("S"),
                dst: id("D"),
                from: OnboardTime(0),
                to: OnboardTime(30),
            },
        );
        assert_eq!(
            outputs,
            vec![
                verification(1, VerificationOutcome::StartOk),
                verification(1, VerificationOutcome::ProgressOk(0)),
                verification(1, VerificationOutcome::ProgressOk(1)),
                verification(1, VerificationOutcome::CompletionFail(ErrorCode::StoreFull)),
            ]
        );
        assert_eq!(table.get(&id("D")).unwrap().entry_count(), 2);
        assert_eq!(table.get(&id("S")).unwrap().entry_count(), 3);
    }

    #[test]
    fn test_copy_rejections() {
        let mut engine = RetrievalEngine::new();
        let mut table = table_with(&[10]);
        let copy = |src: &str, dst: &str| StorageCommand::CopyInWindow {
            src: id(src),
            dst: id(dst),
            from: OnboardTime(0),
            to: OnboardTime(10),
        };
        assert_eq!(
            exec(&mut engine, &mut table, 1, copy("S", "S")),
            vec![verification(1, VerificationOutcome::StartFail(ErrorCode::SameSourceAndDestination))]
        );
        assert_eq!(
            exec(&mut engine, &mut table, 2, copy("S", "X")),
            vec![verification(2, VerificationOutcome::StartFail(ErrorCode::UnknownStoreId))]
        );
    }

    #[test]
    fn test_ingest_failure_reports_header() {
        let mut engine = RetrievalEngine::new();
        let mut table = StoreTable::new();
        table.insert(PacketStore::from_spec(StoreSpec::new(
            id("B"),
            12,
            StoreKind::Bounded,
            VirtualChannel(0),
        )));
        let packet: Vec<u8> = (0..12).collect();
        let mut out = Outbox::new();
        engine.ingest(&mut table, &packet, OnboardTime(1), &mut out);
        assert!(out.is_empty());
        engine.ingest(&mut table, &packet, OnboardTime(2), &mut out);
        assert_eq!(
            out.into_outputs(),
            vec![Output::StoringFailure { header: packet[..11].to_vec(), error: ErrorCode::StoreFull }]
        );
    }
}
