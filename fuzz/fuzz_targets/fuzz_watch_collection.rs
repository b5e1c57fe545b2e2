#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use std::cell::Cell;
use std::rc::Rc;
use vigil_core::{Array, Object};
use vigil_runtime::Scope;

#[derive(Debug, Arbitrary)]
enum Op {
    Push(i8),
    Pop,
    SetIndex(u8, i8),
    Insert(u8, i8),
    Remove(u8),
    SwapToArray,
    SwapToObject,
    SwapToNumber(i8),
    Digest,
}

fuzz_target!(|ops: Vec<Op>| {
    let root = Scope::new_root();
    let array = Array::new();
    let object = Object::new();
    root.set("value", array.clone());

    let fired = Rc::new(Cell::new(0u32));
    let f = Rc::clone(&fired);
    root.watch_collection(|s| s.get("value"), move |_, _, _| f.set(f.get() + 1))
        .unwrap();

    for op in ops.into_iter().take(256) {
        match op {
            Op::Push(v) => array.push(i32::from(v)),
            Op::Pop => {
                array.pop();
            }
            Op::SetIndex(i, v) => array.set(usize::from(i % 16), i32::from(v)),
            Op::Insert(k, v) => {
                object.insert(format!("k{}", k % 8), i32::from(v));
            }
            Op::Remove(k) => {
                object.remove(&format!("k{}", k % 8));
            }
            Op::SwapToArray => root.set("value", array.clone()),
            Op::SwapToObject => root.set("value", object.clone()),
            Op::SwapToNumber(v) => root.set("value", i32::from(v)),
            Op::Digest => {
                root.digest().unwrap();
                // A second digest with no mutation in between must be clean.
                let before = fired.get();
                root.digest().unwrap();
                assert_eq!(before, fired.get());
            }
        }
    }
    root.digest().unwrap();
});
