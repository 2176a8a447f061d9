//! End-to-end exercise of the walkthrough's linear-init scenario: `Cache`
//! warms before `Report` generates, which depends on it.

#[tokio::test]
async fn warm_completes_before_gen_and_context_ends_done() {
    let runtime = modkit::Runtime::new();
    modkit::install_all(&runtime.registry, &runtime.actions, &runtime.bus).unwrap();

    runtime.start().await.unwrap();

    let report = runtime.registry.resolve::<cache_report::Report>("Report").unwrap();
    assert_eq!(report.rendered().as_deref(), Some("report: warmed"));
}
