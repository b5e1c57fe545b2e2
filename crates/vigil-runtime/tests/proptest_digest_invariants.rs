use std::cell::{Cell, RefCell};
use std::rc::Rc;

use proptest::prelude::*;
use vigil_core::{Array, Value, same_value};
use vigil_runtime::{Event, Scope};

/// Parent index for each non-root scope; index 0 is the root.
fn tree_shape() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(any::<prop::sample::Index>(), 0..12).prop_map(|picks| {
        picks
            .iter()
            .enumerate()
            .map(|(i, pick)| pick.index(i + 1))
            .collect()
    })
}

fn build_tree(parents: &[usize], isolated: &[bool]) -> Vec<Scope> {
    let mut scopes = vec![Scope::new_root()];
    for (i, &parent) in parents.iter().enumerate() {
        let flag = isolated.get(i).copied().unwrap_or(false);
        let child = scopes[parent].new_child(flag).unwrap();
        scopes.push(child);
    }
    scopes
}

#[derive(Debug, Clone)]
enum ArrayOp {
    Push(i32),
    Pop,
    Set(usize, i32),
    Noop,
}

fn array_op() -> impl Strategy<Value = ArrayOp> {
    prop_oneof![
        (0..4i32).prop_map(ArrayOp::Push),
        Just(ArrayOp::Pop),
        (0..6usize, 0..4i32).prop_map(|(i, v)| ArrayOp::Set(i, v)),
        Just(ArrayOp::Noop),
    ]
}

proptest! {
    #[test]
    fn every_scope_watcher_fires_once_on_first_digest(
        parents in tree_shape(),
        isolated in prop::collection::vec(any::<bool>(), 12),
    ) {
        let scopes = build_tree(&parents, &isolated);
        let fired = Rc::new(Cell::new(0usize));
        for scope in &scopes {
            let f = Rc::clone(&fired);
            scope.watch(|_| Value::Null, move |_, _, _| f.set(f.get() + 1)).unwrap();
        }
        scopes[0].digest().unwrap();
        prop_assert_eq!(fired.get(), scopes.len());
        scopes[0].digest().unwrap();
        prop_assert_eq!(fired.get(), scopes.len());
    }

    #[test]
    fn derived_chain_settles_in_one_digest(len in 1usize..7, order in any::<prop::sample::Index>(), start in -50i32..50) {
        let root = Scope::new_root();
        root.set("f0", start);
        // Register the chain links rotated so the propagation order varies.
        let offset = order.index(len);
        for k in 0..len {
            let i = (k + offset) % len;
            let source = format!("f{i}");
            let target = format!("f{}", i + 1);
            root.watch(
                move |s| s.get(&source),
                move |new, _, s| {
                    if let Some(n) = new.as_number() {
                        s.set(target.clone(), n + 1.0);
                    }
                },
            ).unwrap();
        }
        root.digest().unwrap();
        let expected = f64::from(start) + len as f64;
        prop_assert_eq!(root.get(&format!("f{len}")).as_number(), Some(expected));
    }

    #[test]
    fn collection_watch_fires_iff_contents_changed(ops in prop::collection::vec(prop::collection::vec(array_op(), 0..4), 1..8)) {
        let root = Scope::new_root();
        let list = Array::new();
        root.set("list", list.clone());
        let fired = Rc::new(Cell::new(0usize));
        let f = Rc::clone(&fired);
        root.watch_collection(|s| s.get("list"), move |_, _, _| f.set(f.get() + 1)).unwrap();
        root.digest().unwrap();
        let mut expected_fires = 1;

        for batch in ops {
            let before = list.to_vec();
            for op in batch {
                match op {
                    ArrayOp::Push(v) => list.push(v),
                    ArrayOp::Pop => { list.pop(); }
                    ArrayOp::Set(i, v) => {
                        if i < list.len() {
                            list.set(i, v);
                        }
                    }
                    ArrayOp::Noop => {}
                }
            }
            let after = list.to_vec();
            let changed = before.len() != after.len()
                || before.iter().zip(&after).any(|(a, b)| !same_value(a, b));
            if changed {
                expected_fires += 1;
            }
            root.digest().unwrap();
            prop_assert_eq!(fired.get(), expected_fires);
        }
    }

    #[test]
    fn emit_reaches_each_ancestor_once(parents in tree_shape(), pick in any::<prop::sample::Index>()) {
        let scopes = build_tree(&parents, &[]);
        let visits = Rc::new(RefCell::new(Vec::new()));
        for scope in &scopes {
            let v = Rc::clone(&visits);
            let id = scope.id();
            scope.on("ping", move |_: &Event, _: &[Value]| v.borrow_mut().push(id)).unwrap();
        }
        let origin = &scopes[pick.index(scopes.len())];
        origin.emit("ping", &[]);

        let mut expected = Vec::new();
        let mut current = Some(origin.clone());
        while let Some(scope) = current {
            expected.push(scope.id());
            current = scope.parent();
        }
        prop_assert_eq!(&*visits.borrow(), &expected);
    }

    #[test]
    fn broadcast_reaches_the_whole_subtree(parents in tree_shape(), pick in any::<prop::sample::Index>()) {
        let scopes = build_tree(&parents, &[]);
        let reached = Rc::new(Cell::new(0usize));
        for scope in &scopes {
            let r = Rc::clone(&reached);
            scope.on("ping", move |_: &Event, _: &[Value]| r.set(r.get() + 1)).unwrap();
        }
        let origin_index = pick.index(scopes.len());
        scopes[origin_index].broadcast("ping", &[]);

        // Parents always precede children, so one forward sweep marks the subtree.
        let mut inside = vec![false; scopes.len()];
        inside[origin_index] = true;
        for (i, &parent) in parents.iter().enumerate() {
            if inside[parent] {
                inside[i + 1] = true;
            }
        }
        prop_assert_eq!(reached.get(), inside.iter().filter(|&&x| x).count());
    }
}
