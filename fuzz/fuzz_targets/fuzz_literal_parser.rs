#![no_main]

use libfuzzer_sys::fuzz_target;
use vigil_runtime::{Expression, Scope};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Some(expression) = Expression::parse_literal(text) else {
        return;
    };
    assert!(expression.is_constant());
    assert!(expression.is_literal());
    let root = Scope::new_root();
    let value = expression.evaluate(&root, None).unwrap();
    assert!(!value.is_container());
});
