#![no_main]

use libfuzzer_sys::fuzz_target;
use trellis::PathExpr;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(expr) = PathExpr::parse(input) {
            // A parsed expression must render and reparse to itself.
            let rendered = expr.to_string();
            let reparsed = PathExpr::parse(&rendered).expect("rendered path must reparse");
            assert_eq!(expr, reparsed);
        }
    }
});
