//! MySQL test containers
//!
//! Docker-backed MySQL instances for the integration suites. Requires a
//! running Docker daemon; suites using these helpers are `#[ignore]`d so
//! the default test run stays hermetic.

use std::time::Duration;

use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::mysql::Mysql;

use xact_conf::BackendSettings;

/// A running MySQL container plus the settings to reach it.
///
/// The container stops when this value is dropped, so keep it alive for the
/// duration of the test.
pub struct MySqlBackend {
	pub container: ContainerAsync<Mysql>,
	pub settings: BackendSettings,
}

/// Start a MySQL container and describe it as a backend named `id`.
///
/// The image default credentials apply: `root` with an empty password,
/// schema `test`.
pub async fn mysql_backend(id: &str) -> MySqlBackend {
	let container = Mysql::default()
		.start()
		.await
		.expect("Failed to start MySQL test container");
	let host = container
		.get_host()
		.await
		.expect("Failed to resolve container host")
		.to_string();
	let port = container
		.get_host_port_ipv4(3306)
		.await
		.expect("Failed to resolve mapped MySQL port");

	MySqlBackend {
		container,
		settings: BackendSettings {
			id: id.to_string(),
			host,
			port,
			user: "root".to_string(),
			password: String::new(),
			database: "test".to_string(),
			pool_size: 5,
			connect_timeout: Duration::from_secs(60),
		},
	}
}
