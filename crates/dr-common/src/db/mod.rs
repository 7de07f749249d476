pub mod developers;
pub mod pool;

pub use developers::{
    DeveloperStorageError, PgRecordStore, RankingCorpus, StoredScores, fetch_developer_snapshot,
    fetch_ranking_corpus, update_developer_scores,
};
pub use pool::{DbPoolError, PgPool, PoolSettings, create_pool_from_url};
