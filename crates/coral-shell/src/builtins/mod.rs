//! Builtin commands for the guest shell.
//!
//! Every command the guest can run is a builtin; there are no external
//! programs inside the virtual machine. Builtins receive a [`CommandCtx`]
//! and report a shell exit code, writing diagnostics to stderr themselves.

mod cat;
mod echo;
mod fsops;
mod grep;
mod head;
mod ls;
mod misc;
mod subagent;
mod tail;
mod wc;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::interp::CommandCtx;

pub use subagent::RPC_REQUEST_DIR;

/// A guest shell builtin.
#[async_trait]
pub trait Builtin: Send + Sync {
    /// Command name as typed in a script.
    fn name(&self) -> &'static str;

    /// One-line description for diagnostics.
    fn summary(&self) -> &'static str;

    /// Run the command; the return value is the shell exit code.
    async fn run(&self, ctx: &mut CommandCtx<'_>) -> i32;
}

/// Registry of the commands available to a guest.
pub struct CommandSet {
    map: HashMap<&'static str, Arc<dyn Builtin>>,
}

impl std::fmt::Debug for CommandSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSet")
            .field("names", &self.names())
            .finish()
    }
}

impl CommandSet {
    /// Create an empty registry.
    pub fn empty() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Create the default registry with the full builtin command set.
    pub fn builtin() -> Self {
        let mut set = Self::empty();
        set.register(Arc::new(cat::CatCommand));
        set.register(Arc::new(echo::EchoCommand));
        set.register(Arc::new(grep::GrepCommand));
        set.register(Arc::new(head::HeadCommand));
        set.register(Arc::new(tail::TailCommand));
        set.register(Arc::new(wc::WcCommand));
        set.register(Arc::new(ls::LsCommand));
        set.register(Arc::new(fsops::MkdirCommand));
        set.register(Arc::new(fsops::RmCommand));
        set.register(Arc::new(fsops::CdCommand));
        set.register(Arc::new(fsops::PwdCommand));
        set.register(Arc::new(misc::TrueCommand));
        set.register(Arc::new(misc::FalseCommand));
        set.register(Arc::new(misc::SleepCommand));
        set.register(Arc::new(subagent::SubagentCommand));
        set
    }

    /// Register a builtin, replacing any existing command of the same name.
    pub fn register(&mut self, builtin: Arc<dyn Builtin>) {
        self.map.insert(builtin.name(), builtin);
    }

    /// Look up a command by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Builtin>> {
        self.map.get(name)
    }

    /// Whether the registry has no commands.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.map.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
