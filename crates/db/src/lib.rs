pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{
    connect, connect_from_config, connect_query_only, connect_sessions_from_config,
    connect_with_settings, DbPool,
};
pub use fixtures::{AnalyticsSeed, DatasetSummary, SeedOptions, SeedResult};
pub use repositories::{
    InMemorySessionStore, NewTurn, RepositoryError, SessionStore, SessionTurn, SqlAnalyticsStore,
    SqlSessionStore,
};
