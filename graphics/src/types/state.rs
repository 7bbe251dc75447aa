//! Resource usage states.

use bitflags::bitflags;

bitflags! {
    /// Usage state of a subresource, as seen by the device.
    ///
    /// `COMMON` is the empty set. Read-only states may be combined; a state
    /// containing any write bit is exclusive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct ResourceState: u32 {
        /// No particular usage.
        const COMMON = 0;
        /// Read as vertex or constant buffer.
        const VERTEX_AND_CONSTANT_BUFFER = 1 << 0;
        /// Read as index buffer.
        const INDEX_BUFFER = 1 << 1;
        /// Written as a colour attachment.
        const RENDER_TARGET = 1 << 2;
        /// Read and written by shaders.
        const UNORDERED_ACCESS = 1 << 3;
        /// Written as a depth attachment.
        const DEPTH_WRITE = 1 << 4;
        /// Read as a depth attachment.
        const DEPTH_READ = 1 << 5;
        /// Sampled outside the pixel stage.
        const NON_PIXEL_SHADER_RESOURCE = 1 << 6;
        /// Sampled in the pixel stage.
        const PIXEL_SHADER_RESOURCE = 1 << 7;
        /// Read as indirect arguments.
        const INDIRECT_ARGUMENT = 1 << 8;
        /// Written by copy commands.
        const COPY_DEST = 1 << 9;
        /// Read by copy commands.
        const COPY_SOURCE = 1 << 10;
        /// Handed to the presentation engine.
        const PRESENT = 1 << 11;
        /// Required state of upload heap memory.
        const GENERIC_READ = Self::VERTEX_AND_CONSTANT_BUFFER.bits()
            | Self::INDEX_BUFFER.bits()
            | Self::NON_PIXEL_SHADER_RESOURCE.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits()
            | Self::INDIRECT_ARGUMENT.bits()
            | Self::COPY_SOURCE.bits();
    }
}

const WRITE_STATES: ResourceState = ResourceState::RENDER_TARGET
    .union(ResourceState::UNORDERED_ACCESS)
    .union(ResourceState::DEPTH_WRITE)
    .union(ResourceState::COPY_DEST);

impl ResourceState {
    /// Whether the state lets the device write the subresource.
    pub fn is_write(self) -> bool {
        self.intersects(WRITE_STATES)
    }

    /// Whether every bit of the state is a read state.
    pub fn is_read_only(self) -> bool {
        !self.is_write()
    }
}

impl Default for ResourceState {
    fn default() -> Self {
        Self::COMMON
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_states() {
        assert!(ResourceState::RENDER_TARGET.is_write());
        assert!(ResourceState::COPY_DEST.is_write());
        assert!(ResourceState::GENERIC_READ.is_read_only());
        assert!(ResourceState::COMMON.is_read_only());
        assert!((ResourceState::PIXEL_SHADER_RESOURCE | ResourceState::DEPTH_WRITE).is_write());
    }
}
