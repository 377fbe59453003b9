pub mod capability;
pub mod message;
pub mod plan;
pub mod stage;

pub use capability::{Capability, Criticality, StageAffinity};
pub use message::{Message, MessageLog, MessageType, Priority};
pub use plan::{FallbackStrategy, OrchestrationPlan, ProviderAssignment};
pub use stage::{PipelineOutcome, StageContext, StageResult, Task, TaskResult};
