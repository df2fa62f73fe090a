pub mod cancel;
pub mod fetcher;
pub mod frame;
pub mod scripts;

pub use cancel::CancelToken;
pub use fetcher::{ContentFetcher, HttpFetcher};
pub use frame::{define, DynamicFrame, FrameControl, FRAME_TAG};
pub use scripts::{ReinsertScripts, ScriptHost};
