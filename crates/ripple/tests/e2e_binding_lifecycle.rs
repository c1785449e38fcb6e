//! End-to-end binding scenarios against the in-memory render tree.
//!
//! Each test installs a fresh [`MemoryTree`], binds nodes to wrapped state,
//! mutates the state directly, and inspects what reached the tree.

use std::cell::RefCell;
use std::rc::Rc;

use ripple::{
    MemoryTree, NodeId, Reactive, RenderTree, Value, batch, bind, bind_slot, debug,
    define_computed, effect, install_render_tree, pause_tracking, reactive, reset,
    resume_tracking,
};
use serde_json::json;

fn setup() -> Rc<MemoryTree> {
    reset();
    let tree = Rc::new(MemoryTree::new());
    install_render_tree(tree.clone());
    tree
}

fn todo_state() -> Reactive {
    reactive(json!({
        "title": "Groceries",
        "items": [
            { "label": "milk", "done": false },
            { "label": "eggs", "done": true }
        ],
        "theme": { "color": "black" }
    }))
    .expect("object")
}

fn text(tree: &MemoryTree, node: NodeId) -> String {
    tree.text(node).unwrap_or_default()
}

#[test]
fn batched_updates_flush_in_document_order() {
    let tree = setup();
    let header = tree.element(tree.root(), "h1");
    let footer = tree.element(tree.root(), "footer");
    let state = todo_state();
    let order = Rc::new(RefCell::new(Vec::new()));

    // Bound in reverse document order on purpose.
    for (node, label) in [(footer, "footer"), (header, "header")] {
        let state = state.clone();
        let order = Rc::clone(&order);
        bind(node, move || {
            order.borrow_mut().push(label);
            state.get("title")
        });
    }
    order.borrow_mut().clear();

    batch(|| {
        state.set("title", "Hardware");
        state.set("title", "Errands");
    });

    assert_eq!(*order.borrow(), vec!["header", "footer"]);
    assert_eq!(text(&tree, header), "Errands");
    assert_eq!(text(&tree, footer), "Errands");
}

#[test]
fn list_item_bindings_follow_nested_state() {
    let tree = setup();
    let list = tree.element(tree.root(), "ul");
    let state = todo_state();
    let items = state.get("items");
    let items = items.as_reactive().expect("nested array").clone();

    let rows: Vec<NodeId> = (0..items.len()).map(|_| tree.element(list, "li")).collect();
    for (index, row) in rows.iter().enumerate() {
        let items = items.clone();
        bind(*row, move || {
            let item = items.get(index);
            let item = item.as_reactive().cloned();
            item.map(|item| {
                let mark = if item.get("done").as_bool() == Some(true) { "x" } else { " " };
                format!("[{mark}] {}", item.get("label").to_display_string())
            })
        });
    }
    assert_eq!(text(&tree, rows[0]), "[ ] milk");
    assert_eq!(text(&tree, rows[1]), "[x] eggs");

    let first = items.get(0usize);
    first.as_reactive().expect("item").set("done", true);
    assert_eq!(text(&tree, rows[0]), "[x] milk");

    let count = tree.element(tree.root(), "span");
    let counter = items.clone();
    bind(count, move || counter.len());
    items.push(json!({ "label": "bread", "done": false }));
    assert_eq!(text(&tree, count), "3");
}

#[test]
fn removed_nodes_stop_receiving_updates() {
    let tree = setup();
    let panel = tree.element(tree.root(), "section");
    let label = tree.element(panel, "span");
    let state = todo_state();
    let runs = Rc::new(RefCell::new(0));
    let (reader, counter) = (state.clone(), Rc::clone(&runs));
    bind(label, move || {
        *counter.borrow_mut() += 1;
        reader.get("title")
    });
    assert_eq!(debug::bindings_for(label).len(), 1);

    tree.remove(panel);
    state.set("title", "Gone");

    assert_eq!(*runs.borrow(), 1);
    assert!(debug::bindings_for(label).is_empty());
    assert!(debug::dependencies(&state).is_empty());
}

#[test]
fn style_bindings_merge_with_existing_declarations() {
    let tree = setup();
    let node = tree.element(tree.root(), "div");
    tree.merge_style(node, "margin", &Value::from("4px"));
    let state = todo_state();
    let reader = state.clone();
    bind_slot(node, "style", move || reader.get("theme"));
    assert_eq!(tree.style(node, "color"), Some(Value::from("black")));

    let theme = state.get("theme");
    theme.as_reactive().expect("theme").set("color", "white");
    assert_eq!(tree.style(node, "color"), Some(Value::from("white")));
    assert_eq!(tree.style(node, "margin"), Some(Value::from("4px")));
}

#[test]
fn structurally_equal_results_are_not_reapplied() {
    let tree = setup();
    let node = tree.element(tree.root(), "p");
    let state = todo_state();
    let reader = state.clone();
    bind(node, move || {
        reader.get("title");
        let labels: Vec<Value> = reader
            .get("items")
            .as_reactive()
            .map(|items| {
                items
                    .values()
                    .iter()
                    .filter_map(|item| item.as_reactive().map(|i| i.get("label")))
                    .collect()
            })
            .unwrap_or_default();
        Value::from(labels)
    });
    assert_eq!(text(&tree, node), "milk,eggs");
    let writes = tree.writes();

    state.set("title", "Same labels");
    assert_eq!(tree.writes(), writes);
}

#[test]
fn computed_properties_feed_bindings_lazily() {
    let tree = setup();
    let node = tree.element(tree.root(), "span");
    let state = todo_state();
    let calls = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&calls);
    define_computed(&state, "remaining", move |s| {
        *counter.borrow_mut() += 1;
        let items = s.get("items");
        items
            .as_reactive()
            .map(|items| {
                items
                    .values()
                    .iter()
                    .filter(|item| {
                        item.as_reactive()
                            .is_some_and(|i| i.get("done").as_bool() != Some(true))
                    })
                    .count()
            })
            .unwrap_or(0)
    });
    assert_eq!(*calls.borrow(), 0);

    let reader = state.clone();
    bind(node, move || format!("{} left", reader.get("remaining").to_display_string()));
    assert_eq!(text(&tree, node), "1 left");
    assert_eq!(*calls.borrow(), 1);

    let items = state.get("items");
    let items = items.as_reactive().expect("items");
    batch(|| {
        items.push(json!({ "label": "tea", "done": false }));
        items.push(json!({ "label": "jam", "done": false }));
    });
    assert_eq!(text(&tree, node), "3 left");
    assert_eq!(*calls.borrow(), 2);
}

#[test]
fn paused_tracking_replays_into_one_batch() {
    let tree = setup();
    let node = tree.element(tree.root(), "span");
    let state = todo_state();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let (reader, sink) = (state.clone(), Rc::clone(&seen));
    effect(move || sink.borrow_mut().push(reader.get("title").to_display_string()));
    let reader = state.clone();
    bind(node, move || reader.get("title"));

    pause_tracking();
    state.set("title", "A");
    state.set("title", "B");
    assert_eq!(text(&tree, node), "Groceries");
    resume_tracking(true);

    assert_eq!(*seen.borrow(), vec!["Groceries", "B"]);
    assert_eq!(text(&tree, node), "B");
    assert_eq!(debug::stats().pending, 0);
}
