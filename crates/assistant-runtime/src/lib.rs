pub mod config;
pub mod error;
pub mod observer;
pub mod orchestrator;

pub use config::RuntimeConfig;
pub use error::{PipelineError, RuntimeBuildError};
pub use observer::{PipelineObserver, PipelineStage, StageOutcome, TracingObserver};
pub use orchestrator::{
    AssistantReply, AssistantRuntime, AssistantRuntimeBuilder, ImageSearchReply, ImageUpload,
    ListingMedia, RequestContext, Route,
};
