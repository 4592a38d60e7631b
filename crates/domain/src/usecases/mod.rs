//! Application use cases / business logic

pub mod normalize;
pub mod publish;
pub mod render;
pub mod run_loop;

pub use normalize::{NormalizeError, Normalizer, NormalizerConfig};
pub use publish::{PublishConfig, PublishUseCase};
pub use render::{RenderSkip, Renderer};
pub use run_loop::{RunLoop, RunLoopConfig, RunLoopError};
