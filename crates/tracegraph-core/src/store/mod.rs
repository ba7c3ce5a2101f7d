//! SQLite persistence: schema, store handle and the saver step.

pub mod database;
pub mod saver;
pub mod schema;

pub use database::Database;
pub use saver::DatabaseSaver;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::SaverConfig;
    use crate::graph::builder::build_trace_graph;
    use crate::models::RunMetadata;
    use crate::parser::ParsedRun;
    use crate::pipeline::PipelineStep;
    use crate::stabilizer::PrimaryKeyStabilizer;
    use crate::summary::RunSummary;

    use super::{Database, DatabaseSaver};

    /// A fresh store with each run saved in order.
    pub fn seeded_store(runs: &[ParsedRun]) -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("store.db")).unwrap();
        db.init_schema().unwrap();
        for run in runs {
            let mut summary = RunSummary::new(RunMetadata {
                run_kind: Some("test".into()),
                ..Default::default()
            });
            let stabilized = PrimaryKeyStabilizer::new(db.clone())
                .run(build_trace_graph(run).0, &mut summary)
                .unwrap();
            DatabaseSaver::new(db.clone(), SaverConfig::default())
                .run(stabilized, &mut summary)
                .unwrap();
        }
        (dir, db)
    }
}
