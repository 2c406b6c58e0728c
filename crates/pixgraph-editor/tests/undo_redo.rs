//! Integration tests: undo/redo through the document session.
//!
//! Drives `DocumentSession` the way a host application would and checks
//! history against the core document's serialized state.

use pixgraph_core::{
    ConcurrencyError, DocumentError, EditorConfig, FlipAxis, NodeId, RectI, ResizeAnchor, SizeI,
    Symmetry, VecD,
};
use pixgraph_editor::{DocumentAction, DocumentSession, InsertAt};
use pretty_assertions::assert_eq;

fn session() -> DocumentSession {
    let _ = env_logger::builder().is_test(true).try_init();
    DocumentSession::new(EditorConfig::default())
}

fn bytes(session: &DocumentSession) -> Vec<u8> {
    session.snapshot().unwrap().to_bytes().unwrap()
}

fn position(session: &DocumentSession, id: NodeId) -> VecD {
    session.document().graph.node(id).unwrap().position
}

// ─── Batches ─────────────────────────────────────────────────────────────

#[test]
fn undo_reverts_one_batch_at_a_time() {
    let mut s = session();
    let layer = s.create_layer(InsertAt::Top).unwrap();
    s.resize_canvas(SizeI::new(128, 32), ResizeAnchor::TopLeft)
        .unwrap();
    assert_eq!(s.document().size, SizeI::new(128, 32));

    assert!(s.undo().unwrap());
    assert_eq!(s.document().size, SizeI::new(64, 64));
    assert!(s.document().graph.contains(layer));

    assert!(s.undo().unwrap());
    assert!(!s.document().graph.contains(layer));
    assert!(s.structure().is_empty());
    assert!(!s.undo().unwrap());
}

#[test]
fn rejected_batch_keeps_change_id_and_state() {
    let mut s = session();
    let layer = s.create_layer(InsertAt::Top).unwrap();
    let early = s.create_cel(layer, 0, 1).unwrap();
    let late = s.create_cel(layer, 3, 1).unwrap();
    let stamp = s.current_change_id();
    let before = bytes(&s);

    // `late` can move two frames back, `early` cannot.
    let result = s.shift_cels(&[late, early], -2);
    assert!(matches!(result, Err(DocumentError::InvalidCelTiming { .. })));
    assert_eq!(s.current_change_id(), stamp);
    assert_eq!(bytes(&s), before);
    assert_eq!(s.timeline().find_cel(late).map(|c| c.start), Some(3));
}

#[test]
fn undo_all_then_redo_all_is_byte_identical() {
    let mut s = session();
    let initial = bytes(&s);

    let a = s.create_layer(InsertAt::Top).unwrap();
    let b = s.create_layer(InsertAt::Top).unwrap();
    let folder = s.create_folder(InsertAt::Top).unwrap();
    s.move_member(a, InsertAt::Into(folder)).unwrap();
    s.create_cel(a, 0, 3).unwrap();
    s.create_cel(b, 2, 2).unwrap();
    s.set_member_opacity(b, 0.5).unwrap();
    s.rename_node(folder, "Background group").unwrap();
    s.resize_image(SizeI::new(40, 20)).unwrap();
    s.rotate(1).unwrap();
    s.flip(FlipAxis::Horizontal).unwrap();
    s.set_frame_rate(24).unwrap();
    s.set_selection(Some(RectI {
        x: 2,
        y: 2,
        width: 5,
        height: 5,
    }))
    .unwrap();
    s.set_symmetry(Symmetry {
        horizontal: true,
        horizontal_axis: 10.0,
        ..Symmetry::default()
    })
    .unwrap();
    let c = s.create_layer(InsertAt::Above(b)).unwrap();
    s.merge_members(&[b, c]).unwrap();
    s.delete_members(&[folder]).unwrap();
    let last = bytes(&s);

    let mut steps = 0;
    while s.undo().unwrap() {
        steps += 1;
    }
    assert_eq!(bytes(&s), initial);

    for _ in 0..steps {
        assert!(s.redo().unwrap());
    }
    assert!(!s.can_redo());
    assert_eq!(bytes(&s), last);
}

#[test]
fn new_edit_after_undo_drops_redo() {
    let mut s = session();
    s.create_layer(InsertAt::Top).unwrap();
    s.undo().unwrap();
    assert!(s.can_redo());
    s.create_folder(InsertAt::Top).unwrap();
    assert!(!s.can_redo());
    assert!(!s.redo().unwrap());
}

#[test]
fn undo_depth_is_bounded_by_config() {
    let mut s = DocumentSession::new(EditorConfig {
        max_undo_depth: 2,
        ..EditorConfig::default()
    });
    for _ in 0..4 {
        s.create_layer(InsertAt::Top).unwrap();
    }
    let mut undone = 0;
    while s.undo().unwrap() {
        undone += 1;
    }
    assert_eq!(undone, 2);
    assert_eq!(s.structure().len(), 2);
}

// ─── Interactive sessions ────────────────────────────────────────────────

#[test]
fn drag_is_one_undo_step() {
    let mut s = session();
    let layer = s.create_layer(InsertAt::Top).unwrap();
    for step in 1..=20 {
        s.update_session(DocumentAction::SetNodePositions {
            positions: vec![(layer, VecD::new(f64::from(step) * 3.0, 1.0))],
        })
        .unwrap();
    }
    assert!(s.is_session_active());
    s.end_session().unwrap();
    assert!(!s.is_session_active());
    assert_eq!(position(&s, layer), VecD::new(60.0, 1.0));

    assert!(s.undo().unwrap());
    assert_eq!(position(&s, layer), VecD::default());
    assert!(s.undo().unwrap());
    assert!(!s.undo().unwrap());
}

#[test]
fn mutations_wait_for_the_session_to_end() {
    let mut s = session();
    let layer = s.create_layer(InsertAt::Top).unwrap();
    s.update_session(DocumentAction::SetNodePositions {
        positions: vec![(layer, VecD::new(5.0, 5.0))],
    })
    .unwrap();

    let concurrency = |r: Result<_, DocumentError>| {
        matches!(
            r,
            Err(DocumentError::Concurrency(ConcurrencyError::UpdateableChangeActive))
        )
    };
    assert!(concurrency(s.create_layer(InsertAt::Top).map(|_| ())));
    assert!(concurrency(s.undo().map(|_| ())));
    assert!(concurrency(s.rename_node(layer, "x")));

    s.cancel_session().unwrap();
    assert_eq!(position(&s, layer), VecD::default());
    s.rename_node(layer, "x").unwrap();
}

#[test]
fn change_block_groups_operations() {
    let mut s = session();
    s.create_layer(InsertAt::Top).unwrap();
    let before = bytes(&s);

    s.start_change_block().unwrap();
    assert!(s.start_change_block().is_err());
    let folder = s.create_folder(InsertAt::Top).unwrap();
    s.create_layer(InsertAt::Into(folder)).unwrap();
    s.create_layer(InsertAt::Into(folder)).unwrap();
    // Views follow along before the block ends.
    assert_eq!(s.structure().len(), 4);
    s.end_change_block().unwrap();

    assert!(s.undo().unwrap());
    assert_eq!(bytes(&s), before);
    assert_eq!(s.structure().len(), 1);
}

#[test]
fn refused_history_requests_leave_change_block_open() {
    let mut s = session();
    let before = bytes(&s);

    s.start_change_block().unwrap();
    s.create_layer(InsertAt::Top).unwrap();
    let block = |r: Result<_, DocumentError>| {
        matches!(
            r,
            Err(DocumentError::Concurrency(ConcurrencyError::ChangeBlockActive))
        )
    };
    assert!(block(s.undo().map(|_| ())));
    assert!(block(s.redo().map(|_| ())));
    assert!(block(s.clear_undo()));
    assert!(matches!(
        s.end_session(),
        Err(DocumentError::Concurrency(ConcurrencyError::NoActiveChange))
    ));

    s.create_layer(InsertAt::Top).unwrap();
    assert!(!s.can_undo());
    assert_eq!(s.structure().len(), 2);
    s.end_change_block().unwrap();

    assert!(s.undo().unwrap());
    assert_eq!(bytes(&s), before);
    assert!(!s.can_undo());
}

#[test]
fn separate_selections_are_separate_steps() {
    let mut s = session();
    let first = RectI {
        x: 0,
        y: 0,
        width: 4,
        height: 4,
    };
    s.set_selection(Some(first)).unwrap();
    s.set_selection(Some(RectI { x: 8, ..first })).unwrap();

    assert!(s.undo().unwrap());
    assert_eq!(s.document().selection, Some(first));
    assert!(s.undo().unwrap());
    assert_eq!(s.document().selection, None);
}

#[test]
fn clear_undo_keeps_save_state() {
    let mut s = session();
    s.create_layer(InsertAt::Top).unwrap();
    s.mark_saved();
    s.clear_undo().unwrap();
    assert!(s.is_saved());
    assert!(!s.can_undo());
}
