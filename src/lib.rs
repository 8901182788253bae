#[macro_use]
extern crate rocket;

pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod models;
pub mod request_logger;
pub mod routes;
pub mod store;

use crate::db::CatalogDb;
use crate::request_logger::RequestLogger;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_okapi::{
    openapi_get_routes,
    settings::UrlObject,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::Once;

static LOGGER: Once = Once::new();

/// Install the process-wide logger once. `RUST_LOG` overrides the default filter.
pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

/// Build the product lookup service.
pub fn rocket() -> Rocket<Build> {
    init_logger();

    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![Method::Get, Method::Options]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .to_cors();

    let rocket = rocket::build()
        .attach(RequestLogger)
        .attach(CatalogDb::init())
        .attach(AdHoc::try_on_ignite("Run Migrations", |rocket| async move {
            match CatalogDb::fetch(&rocket) {
                Some(db) => match ingest::run_migrations(db).await {
                    Ok(()) => Ok(rocket),
                    Err(e) => {
                        log::error!("database migrations failed: {}", e);
                        Err(rocket)
                    }
                },
                None => {
                    log::error!("database pool not available for migrations");
                    Err(rocket)
                }
            }
        }))
        .mount(
            "/",
            openapi_get_routes![routes::health::health_check, routes::products::get_product],
        )
        .mount(
            "/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Product API", "../../openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        );

    match cors {
        Ok(cors) => rocket.attach(cors),
        Err(e) => {
            log::error!("invalid CORS configuration, serving without CORS: {}", e);
            rocket
        }
    }
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use crate::db::CatalogDb;
    use crate::models::Product;
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use rocket_db_pools::Database;
    use rocket_db_pools::sqlx::{self, PgPool};

    pub use database::{TestDatabase, TestDatabaseError};

    /// Product with predictable field values derived from `id`.
    pub fn sample_product(id: i64) -> Product {
        Product {
            id,
            price: id as f64 + 0.99,
            title: format!("Product {id}"),
            category: "Electronics".to_string(),
            brand: "Acme".to_string(),
            url: format!("https://shop.example.com/p/{id}"),
            description: format!("Description for product {id}"),
        }
    }

    /// Render `product` as one JSON line.
    pub fn product_line(product: &Product) -> String {
        serde_json::to_string(product).expect("product serializes")
    }

    /// JSON-lines body with products `ids`, one per line.
    pub fn jsonl_body(ids: impl IntoIterator<Item = i64>) -> String {
        let mut body = String::new();
        for id in ids {
            body.push_str(&product_line(&sample_product(id)));
            body.push('\n');
        }
        body
    }

    pub async fn count_products(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(pool)
            .await
    }

    pub mod database {
        use log::LevelFilter;
        use reqwest::Url;
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers_modules::postgres::Postgres;
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use tokio::runtime::Handle;
        use uuid::Uuid;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("invalid database url: {0}")]
            InvalidUrl(String),
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        impl TestDatabaseError {
            /// No database could be reached at all; callers skip instead of failing.
            pub fn is_unavailable(&self) -> bool {
                matches!(self, TestDatabaseError::Container(_))
            }
        }

        /// Ephemeral database factory for integration tests.
        ///
        /// Each instance creates its own uniquely named database, so tests can run in
        /// parallel against one server.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
            url: String,
            container: Option<ContainerAsync<Postgres>>,
        }

        impl TestDatabase {
            /// Use `TEST_DATABASE_URL` when set, otherwise start a disposable Postgres
            /// container.
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                match std::env::var("TEST_DATABASE_URL") {
                    Ok(url) if !url.trim().is_empty() => Self::with_server(url.trim(), None).await,
                    _ => Self::new().await,
                }
            }

            /// Provision a fresh database inside a new Postgres container.
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let container = Postgres::default().start().await?;
                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                Self::with_server(&admin_url, Some(container)).await
            }

            async fn with_server(
                server_url: &str,
                container: Option<ContainerAsync<Postgres>>,
            ) -> Result<Self, TestDatabaseError> {
                let base_options: PgConnectOptions =
                    server_url.parse().map_err(TestDatabaseError::Sqlx)?;
                let base_options = base_options.log_statements(LevelFilter::Off);

                let base_name = base_options
                    .get_database()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "postgres".to_string());

                let admin_options = base_options.clone().database("postgres");
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await?;

                let new_db_name = format!("{}_{}", base_name, Uuid::new_v4().simple());
                let create_sql = format!("CREATE DATABASE \"{}\" TEMPLATE template0", new_db_name);
                sqlx::query(&create_sql).execute(&admin_pool).await?;
                admin_pool.close().await;

                let mut url = Url::parse(server_url)
                    .map_err(|e| TestDatabaseError::InvalidUrl(e.to_string()))?;
                url.set_path(&format!("/{}", new_db_name));

                let pool = PgPoolOptions::new()
                    .max_connections(8)
                    .connect_with(base_options.clone().database(&new_db_name))
                    .await?;

                crate::ingest::run_migrations(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    database_name: new_db_name,
                    url: url.to_string(),
                    container,
                })
            }

            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            /// Connection string for the ephemeral database.
            pub fn url(&self) -> &str {
                &self.url
            }

            /// Close pool connections and drop the ephemeral database.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }

                drop_database_with_fallback(self.admin_options.clone(), &self.database_name)
                    .await?;

                if let Some(container) = self.container.take() {
                    drop(container);
                }

                Ok(())
            }
        }

        async fn drop_database_with_fallback(
            admin_options: PgConnectOptions,
            database_name: &str,
        ) -> Result<(), sqlx::Error> {
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options)
                .await?;

            let drop_force = format!("DROP DATABASE \"{}\" WITH (FORCE)", database_name);
            match sqlx::query(&drop_force).execute(&admin_pool).await {
                Ok(_) => Ok(()),
                Err(err) if force_drop_unsupported(&err) => {
                    let drop_sql = format!("DROP DATABASE \"{}\"", database_name);
                    sqlx::query(&drop_sql).execute(&admin_pool).await?;
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }

        fn force_drop_unsupported(err: &sqlx::Error) -> bool {
            matches!(
                err,
                sqlx::Error::Database(db_err)
                    if db_err
                        .code()
                        .map(|code| code == "42601" || code == "0A000")
                        .unwrap_or(false)
            )
        }

        impl Drop for TestDatabase {
            fn drop(&mut self) {
                if let Some(pool) = self.pool.take() {
                    let admin_options = self.admin_options.clone();
                    let db_name = self.database_name.clone();
                    if let Ok(handle) = Handle::try_current() {
                        handle.spawn(async move {
                            pool.close().await;
                            let _ = drop_database_with_fallback(admin_options, &db_name).await;
                        });
                    } else {
                        std::thread::spawn(move || {
                            if let Ok(rt) = tokio::runtime::Runtime::new() {
                                rt.block_on(async move {
                                    pool.close().await;
                                    let _ =
                                        drop_database_with_fallback(admin_options, &db_name).await;
                                });
                            }
                        });
                    }
                }

                if let Some(container) = self.container.take() {
                    drop(container);
                }
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    #[derive(Default)]
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        catalog_db: bool,
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                catalog_db: false,
            }
        }

        /// Mount routes at the root, as the service does.
        pub fn mount_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/".to_string(), routes));
            self
        }

        /// Attach the catalog pool, pointed at `url`.
        pub fn catalog_db(mut self, url: &str) -> Self {
            self.figment = self
                .figment
                .merge(("databases.catalog_db.url", url))
                .merge(("databases.catalog_db.max_connections", 4));
            self.catalog_db = true;
            self
        }

        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment);

            if self.catalog_db {
                rocket = rocket.attach(CatalogDb::init());
            }

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            rocket
        }

        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
