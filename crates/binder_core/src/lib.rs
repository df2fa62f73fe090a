pub mod config;
pub mod controller;
pub mod dom;
pub mod evaluator;
pub mod ownership;
pub mod path;
pub mod registry;
pub mod runtime;
pub mod template;
pub mod util;

pub use config::{load_config, BinderConfig, DebugFilter};
pub use controller::{ActionTable, Args, Behavior, Bound, Controller, WeakController};
pub use dom::{Document, Event};
pub use evaluator::{EvalScope, ExpressionEvaluator};
pub use registry::{ElementHandle, ElementHost, ElementRegistry};
pub use runtime::Runtime;
