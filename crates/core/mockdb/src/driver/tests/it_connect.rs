//! End-to-end interception with fake tools and a fake driver

use std::sync::Arc;

use pretty_assertions::assert_eq;

use crate::{
    builder::BuildError,
    driver::{ConnectError, MockDriver},
    options::Options,
    resolver::ResolveError,
    service::MockService,
    testing::{FakeDriver, FakeInvoker, fake_bin_dir, fast_settings, mock_options},
    tools::Tool,
};

fn driver(bin: &tempfile::TempDir) -> MockDriver<FakeDriver, FakeInvoker> {
    let service = MockService::with_invoker(FakeInvoker::new(), fast_settings(bin.path()));
    MockDriver::new(Arc::new(service), FakeDriver::default())
}

#[test]
fn connect_with_unrecognized_url_passes_through() {
    //* Given
    let bin = fake_bin_dir();
    let driver = driver(&bin);

    //* When
    let connection = driver
        .connect("mysql://db.internal:3306/shop", &mock_options(3307))
        .expect("unrecognized url should not fail");

    //* Then
    assert!(connection.is_none());
    assert!(driver.service().builder().invoker().invocations().is_empty());
    assert!(driver.inner().connections().is_empty());
}

#[test]
fn connect_with_bare_prefix_passes_through() {
    let bin = fake_bin_dir();
    let driver = driver(&bin);

    let connection = driver
        .connect("mysql+mock://", &Options::new())
        .expect("bare prefix should not fail");

    assert!(connection.is_none());
}

#[test]
fn connect_rewrites_target_and_cleans_options() {
    //* Given
    let bin = fake_bin_dir();
    let driver = driver(&bin);
    let mut options = mock_options(3307);
    options.insert("user".to_string(), "app".to_string());
    options.insert("password".to_string(), "s3cret".to_string());

    //* When
    let connection = driver
        .connect(
            "mysql+mock://127.0.0.1:3306/shop?charset=utf8mb4&mockKey=ignored",
            &options,
        )
        .expect("connect should succeed")
        .expect("mock url should be intercepted");

    //* Then
    assert_eq!(connection.target.to_string(), "mysql://localhost:3307/shop");
    assert_eq!(
        connection.options,
        Options::from([
            ("charset".to_string(), "utf8mb4".to_string()),
            ("user".to_string(), "root".to_string()),
        ])
    );
}

#[test]
fn connect_twice_with_irrelevant_extra_param_snapshots_once() {
    //* Given
    let bin = fake_bin_dir();
    let driver = driver(&bin);

    //* When
    let first = driver
        .connect("mysql+mock://127.0.0.1:3306/shop", &mock_options(3307))
        .expect("first connect should succeed");
    let second = driver
        .connect(
            "mysql+mock://127.0.0.1:3306/shop?connectTimeout=5000",
            &mock_options(3307),
        )
        .expect("second connect should succeed");

    //* Then
    assert!(first.is_some() && second.is_some());
    assert_eq!(driver.service().builder().invoker().count(Tool::Dump), 1);
    assert_eq!(driver.service().registry().len(), 1);
    assert_eq!(driver.inner().connections().len(), 2);
}

#[test]
fn connect_without_mock_port_fails() {
    //* Given
    let bin = fake_bin_dir();
    let driver = driver(&bin);

    //* When
    let result = driver.connect("mysql+mock://127.0.0.1:3306/shop", &Options::new());

    //* Then
    assert!(
        matches!(result, Err(ConnectError::Resolve(ResolveError::MissingOption { .. }))),
        "expected MissingOption, got {result:?}"
    );
}

#[test]
fn connect_with_equal_ports_fails_without_side_effects() {
    //* Given
    let bin = fake_bin_dir();
    let driver = driver(&bin);

    //* When
    let result = driver.connect("mysql+mock://127.0.0.1:3306/shop", &mock_options(3306));

    //* Then
    assert!(
        matches!(result, Err(ConnectError::Build(BuildError::PortConflict { .. }))),
        "expected PortConflict, got {result:?}"
    );
    assert!(driver.service().builder().invoker().invocations().is_empty());
}

#[test]
fn capability_queries_pass_through() {
    let bin = fake_bin_dir();
    let driver = driver(&bin);

    assert_eq!((driver.major_version(), driver.minor_version()), (8, 4));
    assert!(driver.accepts_url("mysql+mock://127.0.0.1/shop"));
    assert!(!driver.accepts_url("mysql://127.0.0.1/shop"));
}
