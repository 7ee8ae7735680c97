#[test]
fn ui() {
    let t = trybuild::TestCases::new();
    t.pass("tests/ui/event_basic.rs");
    t.pass("tests/ui/event_default.rs");
    t.pass("tests/ui/event_aggregate_id.rs");
}
