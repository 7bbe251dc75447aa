//! Command recording.
//!
//! Tasks record into a [`CommandList`] during their Execute phase. A list
//! tracks how every resource it touches is used ([`UsageSet`]), binds shader
//! parameters through a [`BindingRuntime`](crate::descriptors::BindingRuntime)
//! and is turned into a [`RecordedList`] for submission.
//!
//! Native allocators and lists are recycled through [`CommandPools`].

mod commands;
mod list;
mod pools;
mod usage;

use bitflags::bitflags;

pub use commands::{BindPoint, Command, Transition};
pub use list::{CommandList, RecordedList};
pub use pools::{CommandAllocator, CommandPools, NativeCommandList};
pub use usage::{SubresourceUsage, UsageSet};

bitflags! {
    /// Operations a command list can record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ListCapabilities: u8 {
        const COPY = 1 << 0;
        const COMPUTE = 1 << 1;
        const GRAPHICS = 1 << 2;
    }
}

/// Kind of command list, ordered by increasing capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandListKind {
    Copy,
    Compute,
    Graphics,
}

impl CommandListKind {
    /// All kinds, in pool order.
    pub const ALL: [CommandListKind; 3] = [Self::Copy, Self::Compute, Self::Graphics];

    /// Operations this kind supports. Each kind is a superset of the previous.
    pub fn capabilities(self) -> ListCapabilities {
        match self {
            Self::Copy => ListCapabilities::COPY,
            Self::Compute => ListCapabilities::COPY | ListCapabilities::COMPUTE,
            Self::Graphics => ListCapabilities::all(),
        }
    }

    /// Whether a list of this kind can record operations needing `required`.
    pub fn supports(self, required: ListCapabilities) -> bool {
        self.capabilities().contains(required)
    }

    /// Least capable kind that supports `required`.
    pub fn minimal_for(required: ListCapabilities) -> Self {
        Self::ALL
            .into_iter()
            .find(|kind| kind.supports(required))
            .unwrap_or(Self::Graphics)
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(CommandListKind::Copy, ListCapabilities::COPY, true)]
    #[case(CommandListKind::Copy, ListCapabilities::COMPUTE, false)]
    #[case(CommandListKind::Compute, ListCapabilities::COPY, true)]
    #[case(CommandListKind::Compute, ListCapabilities::GRAPHICS, false)]
    #[case(CommandListKind::Graphics, ListCapabilities::all(), true)]
    fn test_capabilities(
        #[case] kind: CommandListKind,
        #[case] required: ListCapabilities,
        #[case] expected: bool,
    ) {
        assert_eq!(kind.supports(required), expected);
    }

    #[test]
    fn test_minimal_kind() {
        assert_eq!(
            CommandListKind::minimal_for(ListCapabilities::COPY),
            CommandListKind::Copy
        );
        assert_eq!(
            CommandListKind::minimal_for(ListCapabilities::COMPUTE),
            CommandListKind::Compute
        );
        assert_eq!(
            CommandListKind::minimal_for(ListCapabilities::GRAPHICS),
            CommandListKind::Graphics
        );
    }
}
