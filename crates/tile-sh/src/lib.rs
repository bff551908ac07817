pub mod call;
pub mod columnize;
pub mod completion;
pub mod shell;

pub use call::{CallError, CallExpr, CallParser};
pub use columnize::columnize;
pub use completion::CompletionCycle;
pub use shell::{Shell, ShellError, DEFAULT_TERMWIDTH, NO_SUCH_PATH};
