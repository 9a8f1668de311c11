use super::*;
use crate::server::pane_store::{PaneStateStore, PaneStoreConfig};

fn store() -> (Arc<PaneStateStore>, SessionStore) {
    let panes = Arc::new(PaneStateStore::new(PaneStoreConfig::default()));
    let sessions = SessionStore::new(panes.clone());
    (panes, sessions)
}

fn sized(name: Option<&str>, cols: u16, rows: u16) -> NewSession {
    NewSession {
        name: name.map(str::to_string),
        cols,
        rows,
        ..NewSession::default()
    }
}

fn horizontal() -> SplitOptions {
    SplitOptions {
        direction: SplitDirection::Horizontal,
        ..SplitOptions::default()
    }
}

fn active_panes(sessions: &SessionStore, window: WindowId) -> Vec<PaneId> {
    sessions
        .pane_contexts(PaneScope::Window(window))
        .into_iter()
        .filter(|pane| pane.pane_active)
        .map(|pane| pane.pane_id)
        .collect()
}

#[test]
fn sessions_get_lowest_free_numeric_name() {
    let (_, sessions) = store();
    let first = sessions.create_session(sized(None, 80, 24)).unwrap();
    let named = sessions.create_session(sized(Some("1"), 80, 24)).unwrap();
    let third = sessions.create_session(sized(None, 80, 24)).unwrap();
    assert_eq!(first.session_name, "0");
    assert_eq!(named.session_name, "1");
    assert_eq!(third.session_name, "2");
    assert_eq!(first.session_id.to_string(), "$0");
    assert_eq!(first.window_id.to_string(), "@0");
    assert_eq!(first.pane_id.to_string(), "%0");

    assert_eq!(
        sessions.create_session(sized(Some("1"), 80, 24)),
        Err(StoreError::DuplicateSession("1".to_string()))
    );
    let dotted = sessions.create_session(sized(Some("a.b:c"), 80, 24)).unwrap();
    assert_eq!(dotted.session_name, "a_b_c");
}

#[test]
fn split_lays_out_panes_and_ensures_pane_state() {
    let (panes, sessions) = store();
    let root = sessions.create_session(sized(Some("work"), 80, 24)).unwrap();
    assert_eq!(panes.size("%0"), Some((80, 24)));

    let added = sessions.split_pane(root.pane_id, horizontal()).unwrap();
    assert_eq!(added.pane_id, PaneId(1));
    assert_eq!(added.pane_index, 1);
    assert!(added.pane_active);
    assert_eq!((added.pane_width, added.pane_height), (39, 24));
    assert_eq!(panes.size("%1"), Some((39, 24)));
    assert_eq!(panes.size("%0"), Some((40, 24)));
    assert_eq!(active_panes(&sessions, root.window_id), vec![PaneId(1)]);

    let before = sessions
        .split_pane(
            PaneId(1),
            SplitOptions {
                before: true,
                select: false,
                ..SplitOptions::default()
            },
        )
        .unwrap();
    let order: Vec<PaneId> = sessions
        .pane_contexts(PaneScope::Window(root.window_id))
        .iter()
        .map(|pane| pane.pane_id)
        .collect();
    assert_eq!(order, vec![PaneId(0), before.pane_id, PaneId(1)]);
    assert_eq!(active_panes(&sessions, root.window_id), vec![PaneId(1)]);
}

#[test]
fn tiny_pane_cannot_split() {
    let (_, sessions) = store();
    let root = sessions.create_session(sized(None, 80, 2)).unwrap();
    assert_eq!(
        sessions.split_pane(root.pane_id, SplitOptions::default()),
        Err(StoreError::CannotSplit)
    );
    assert_eq!(sessions.all_panes().len(), 1);
}

#[test]
fn killing_active_pane_selects_positional_sibling() {
    let (_, sessions) = store();
    let root = sessions.create_session(sized(None, 80, 24)).unwrap();
    let second = sessions.split_pane(root.pane_id, SplitOptions::default()).unwrap();
    let third = sessions.split_pane(second.pane_id, SplitOptions::default()).unwrap();
    sessions.select_pane(second.pane_id).unwrap();

    let removal = sessions.kill_pane(second.pane_id).unwrap();
    assert!(!removal.window_removed);
    assert_eq!(active_panes(&sessions, root.window_id), vec![third.pane_id]);

    sessions.kill_pane(third.pane_id).unwrap();
    assert_eq!(active_panes(&sessions, root.window_id), vec![root.pane_id]);
    let only = sessions.pane_context(root.pane_id).unwrap();
    assert_eq!((only.pane_width, only.pane_height, only.pane_index), (80, 24, 0));
}

#[test]
fn last_pane_removes_window_then_session() {
    let (panes, sessions) = store();
    let root = sessions.create_session(sized(Some("main"), 80, 24)).unwrap();
    let second = sessions.add_window(root.session_id, Some("logs"), true).unwrap();
    let third = sessions.add_window(root.session_id, None, true).unwrap();
    assert_eq!(third.window_index, 2);

    let removal = sessions.kill_pane(third.pane_id).unwrap();
    assert!(removal.window_removed);
    assert!(!removal.session_removed);
    let current = sessions.resolve_target("main:", "").unwrap();
    assert_eq!(current.window_id, second.window_id);

    sessions.select_window(root.window_id).unwrap();
    sessions.remove_window(root.window_id).unwrap();
    let current = sessions.resolve_target("main:", "").unwrap();
    assert_eq!(current.window_id, second.window_id);

    let removal = sessions.kill_pane(second.pane_id).unwrap();
    assert!(removal.session_removed);
    assert!(sessions.is_empty());
    assert!(!panes.contains(&second.pane_id.to_string()));
}

#[test]
fn targets_resolve_relative_to_caller() {
    let (_, sessions) = store();
    let alpha = sessions.create_session(sized(Some("alpha"), 80, 24)).unwrap();
    let beta = sessions.create_session(sized(Some("beta"), 80, 24)).unwrap();
    let beta_split = sessions.split_pane(beta.pane_id, SplitOptions::default()).unwrap();

    let caller = beta.pane_id.to_string();
    assert_eq!(sessions.resolve_target("", &caller).unwrap().pane_id, beta.pane_id);
    assert_eq!(sessions.resolve_target("", "").unwrap().pane_id, alpha.pane_id);
    assert_eq!(sessions.resolve_target("beta:", "").unwrap().pane_id, beta_split.pane_id);
    assert_eq!(sessions.resolve_target(":.1", &caller).unwrap().pane_id, beta_split.pane_id);
    assert_eq!(sessions.resolve_target("alpha:0.0", &caller).unwrap().pane_id, alpha.pane_id);
    assert_eq!(sessions.resolve_target("1", &caller).unwrap().pane_id, beta_split.pane_id);
    assert_eq!(sessions.resolve_session("al", "").unwrap().name, "alpha");
    assert_eq!(
        sessions.resolve_window("@1", "").unwrap().window_id,
        beta.window_id
    );

    assert_eq!(
        sessions.resolve_target("%9", ""),
        Err(StoreError::PaneNotFound("%9".to_string()))
    );
    assert_eq!(
        sessions.resolve_session("gamma", ""),
        Err(StoreError::SessionNotFound("gamma".to_string()))
    );
    assert_eq!(
        sessions.resolve_target("alpha:7", ""),
        Err(StoreError::WindowNotFound("7".to_string()))
    );
}

#[test]
fn removed_pane_does_not_resolve() {
    let (_, sessions) = store();
    let root = sessions.create_session(sized(None, 80, 24)).unwrap();
    let split = sessions.split_pane(root.pane_id, SplitOptions::default()).unwrap();
    let spec = split.pane_id.to_string();

    let resolved = sessions.resolve_target(&spec, "").unwrap();
    sessions.kill_pane(resolved.pane_id).unwrap();

    assert_eq!(
        sessions.resolve_target(&spec, ""),
        Err(StoreError::PaneNotFound(spec.clone()))
    );
    assert!(sessions.pane_context(resolved.pane_id).is_err());
    assert!(sessions.kill_pane(resolved.pane_id).is_err());
}

#[test]
fn resize_moves_split_and_propagates_sizes() {
    let (panes, sessions) = store();
    let root = sessions.create_session(sized(None, 81, 24)).unwrap();
    let right = sessions.split_pane(root.pane_id, horizontal()).unwrap();
    assert_eq!(right.pane_width, 40);

    let resized = sessions
        .resize_pane(right.pane_id, Some(SizeChange::To(20)), None)
        .unwrap();
    assert_eq!(resized.pane_width, 20);
    assert_eq!(sessions.pane_context(root.pane_id).unwrap().pane_width, 60);

    let shrunk = sessions
        .resize_pane(right.pane_id, Some(SizeChange::By(-5)), Some(SizeChange::To(3)))
        .unwrap();
    assert_eq!((shrunk.pane_width, shrunk.pane_height), (15, 24));
    assert_eq!(panes.size("%1"), Some((15, 24)));
}

#[test]
fn swap_within_window_exchanges_positions() {
    let (_, sessions) = store();
    let root = sessions.create_session(sized(None, 80, 24)).unwrap();
    let right = sessions.split_pane(root.pane_id, horizontal()).unwrap();

    sessions.swap_panes(root.pane_id, right.pane_id).unwrap();
    let moved = sessions.pane_context(right.pane_id).unwrap();
    assert_eq!((moved.pane_index, moved.pane_width), (0, 40));
    assert!(moved.pane_active);
    let other = sessions.pane_context(root.pane_id).unwrap();
    assert_eq!((other.pane_index, other.pane_width), (1, 39));
}

#[test]
fn swap_across_windows_keeps_active_slots() {
    let (_, sessions) = store();
    let root = sessions.create_session(sized(None, 80, 24)).unwrap();
    let other = sessions.add_window(root.session_id, None, false).unwrap();

    sessions.swap_panes(root.pane_id, other.pane_id).unwrap();
    let moved = sessions.pane_context(other.pane_id).unwrap();
    assert_eq!(moved.window_id, root.window_id);
    assert!(moved.pane_active);
    let back = sessions.pane_context(root.pane_id).unwrap();
    assert_eq!(back.window_id, other.window_id);
}

#[test]
fn directional_select_uses_geometry() {
    let (_, sessions) = store();
    let root = sessions.create_session(sized(None, 80, 24)).unwrap();
    let right = sessions.split_pane(root.pane_id, horizontal()).unwrap();

    let left = sessions
        .select_pane_direction(right.pane_id, Navigate::Left)
        .unwrap();
    assert_eq!(left.pane_id, root.pane_id);
    let stay = sessions
        .select_pane_direction(root.pane_id, Navigate::Up)
        .unwrap();
    assert_eq!(stay.pane_id, root.pane_id);
}

#[test]
fn wildcard_kills_run_in_tree_order() {
    let (_, sessions) = store();
    let root = sessions.create_session(sized(None, 80, 24)).unwrap();
    let b = sessions.split_pane(root.pane_id, SplitOptions::default()).unwrap();
    let c = sessions.split_pane(b.pane_id, SplitOptions::default()).unwrap();

    let killed = sessions.kill_other_panes(b.pane_id).unwrap();
    assert_eq!(killed, vec![root.pane_id, c.pane_id]);
    assert_eq!(active_panes(&sessions, root.window_id), vec![b.pane_id]);

    let w1 = sessions.add_window(root.session_id, None, false).unwrap();
    let w2 = sessions.add_window(root.session_id, None, false).unwrap();
    let removed = sessions.remove_other_windows(w1.window_id).unwrap();
    assert_eq!(removed, vec![root.window_id, w2.window_id]);
}

#[test]
fn all_panes_iterates_in_tree_order() {
    let (_, sessions) = store();
    let a = sessions.create_session(sized(Some("a"), 80, 24)).unwrap();
    let b = sessions.create_session(sized(Some("b"), 80, 24)).unwrap();
    let a_split = sessions
        .split_pane(a.pane_id, SplitOptions { before: true, ..SplitOptions::default() })
        .unwrap();
    let ids: Vec<PaneId> = sessions.all_panes().iter().map(|pane| pane.pane_id).collect();
    assert_eq!(ids, vec![a_split.pane_id, a.pane_id, b.pane_id]);
    assert_eq!(sessions.pane_ids().len(), 3);
}

#[test_timeout::timeout(30)]
fn concurrent_resolution_during_mutation_never_panics() {
    let (_, sessions) = store();
    let root = sessions.create_session(sized(None, 200, 60)).unwrap();

    std::thread::scope(|scope| {
        let sessions = &sessions;
        scope.spawn(move || {
            for _ in 0..50 {
                if let Ok(added) = sessions.split_pane(root.pane_id, SplitOptions::default()) {
                    let _ = sessions.kill_pane(added.pane_id);
                }
            }
        });
        for _ in 0..3 {
            scope.spawn(move || {
                for n in 0..200 {
                    let spec = format!("%{}", n % 60);
                    if let Ok(pane) = sessions.resolve_target(&spec, "") {
                        let _ = sessions.pane_context(pane.pane_id);
                    }
                    let _ = sessions.all_panes();
                }
            });
        }
    });

    assert_eq!(sessions.all_panes().len(), 1);
}
