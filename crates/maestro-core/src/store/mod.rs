mod stage_store;

pub use stage_store::{StageStore, StoredStageResult};
