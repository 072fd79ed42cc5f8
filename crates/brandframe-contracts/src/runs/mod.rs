mod result;

pub use result::{
    write_result, FailureKind, PipelineKind, PipelineResult, ResponseClass, RunStatus,
};
