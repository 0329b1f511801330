pub mod shell;

pub use shell::{HELP, Reply, Shell};
