//! Binding layout compiler.
//!
//! A [`BindingLayout`] packs a set of abstract shader parameters into the
//! fixed-size root table of a pipeline. Every root entry costs words out of
//! a budget (64 by default):
//!
//! | Entry | Cost |
//! |-------|------|
//! | Inline constants | `ceil(size / 4)` words |
//! | Buffer-view entry | 2 words |
//! | Descriptor table | 1 word |
//!
//! Textures and unordered views always live in the shared resource table and
//! samplers in their own sampler table. Constants are placed inline when they
//! fit, demoted to buffer-view entries when they don't, and finally moved into
//! the resource table.

use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use crate::error::{FrameError, FrameResult};

static NEXT_LAYOUT_ID: AtomicU64 = AtomicU64::new(1);

/// Root table budget of most hardware, in 32-bit words.
pub const DEFAULT_BUDGET_WORDS: u32 = 64;

const BUFFER_VIEW_WORDS: u32 = 2;
const TABLE_WORDS: u32 = 1;

/// Kind of shader parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindKind {
    Constant,
    Texture,
    Unordered,
    Sampler,
}

/// A shader parameter, identified by kind, register space and register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindParameter {
    pub kind: BindKind,
    pub space: u32,
    pub register: u32,
}

impl BindParameter {
    pub fn new(kind: BindKind, register: u32) -> Self {
        Self {
            kind,
            space: 0,
            register,
        }
    }

    pub fn constant(register: u32) -> Self {
        Self::new(BindKind::Constant, register)
    }

    pub fn texture(register: u32) -> Self {
        Self::new(BindKind::Texture, register)
    }

    pub fn unordered(register: u32) -> Self {
        Self::new(BindKind::Unordered, register)
    }

    pub fn sampler(register: u32) -> Self {
        Self::new(BindKind::Sampler, register)
    }

    pub fn in_space(mut self, space: u32) -> Self {
        self.space = space;
        self
    }
}

bitflags! {
    /// Shader stages that read a parameter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderVisibility: u8 {
        const VERTEX = 1 << 0;
        const PIXEL = 1 << 1;
        const COMPUTE = 1 << 2;
    }
}

impl Default for ShaderVisibility {
    fn default() -> Self {
        Self::all()
    }
}

/// Input to the layout compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindParameterDesc {
    pub parameter: BindParameter,
    /// Size in bytes for constants, 0 when only known at bind time.
    pub size: u32,
    /// Relative change frequency, higher changes more often.
    pub change_frequency: u32,
    pub visibility: ShaderVisibility,
}

impl BindParameterDesc {
    pub fn new(parameter: BindParameter) -> Self {
        Self {
            parameter,
            size: 0,
            change_frequency: 0,
            visibility: ShaderVisibility::all(),
        }
    }

    /// Constants of `size` bytes at `register`.
    pub fn constants(register: u32, size: u32) -> Self {
        Self::new(BindParameter::constant(register)).with_size(size)
    }

    pub fn texture(register: u32) -> Self {
        Self::new(BindParameter::texture(register))
    }

    pub fn unordered(register: u32) -> Self {
        Self::new(BindParameter::unordered(register))
    }

    pub fn sampler(register: u32) -> Self {
        Self::new(BindParameter::sampler(register))
    }

    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    pub fn with_frequency(mut self, change_frequency: u32) -> Self {
        self.change_frequency = change_frequency;
        self
    }

    pub fn with_visibility(mut self, visibility: ShaderVisibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn in_space(mut self, space: u32) -> Self {
        self.parameter.space = space;
        self
    }
}

/// Which table a descriptor table entry points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Resources,
    Samplers,
}

/// A run of consecutive registers inside a descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableRange {
    pub kind: BindKind,
    pub space: u32,
    pub base_register: u32,
    pub count: u32,
    /// Offset of the first descriptor inside the table.
    pub offset: u32,
}

/// One root table entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RootEntry {
    Constants {
        words: u32,
        visibility: ShaderVisibility,
    },
    ConstantBufferView {
        visibility: ShaderVisibility,
    },
    Table {
        kind: TableKind,
        ranges: Vec<TableRange>,
    },
}

impl RootEntry {
    /// Words the entry costs out of the budget.
    pub fn cost(&self) -> u32 {
        match self {
            Self::Constants { words, .. } => *words,
            Self::ConstantBufferView { .. } => BUFFER_VIEW_WORDS,
            Self::Table { .. } => TABLE_WORDS,
        }
    }

    /// Number of descriptors in a table entry, 0 otherwise.
    pub fn table_size(&self) -> u32 {
        match self {
            Self::Table { ranges, .. } => ranges.iter().map(|range| range.count).sum(),
            _ => 0,
        }
    }
}

/// Where a parameter ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingMapping {
    pub parameter: BindParameter,
    pub slot: u32,
    /// Offset inside the table when `slot` is a descriptor table.
    pub table_offset: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Inline(u32),
    BufferView,
}

impl Placement {
    fn cost(self) -> u32 {
        match self {
            Self::Inline(words) => words,
            Self::BufferView => BUFFER_VIEW_WORDS,
        }
    }
}

/// A compiled binding layout.
///
/// Immutable after compilation and shared between lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingLayout {
    id: u64,
    budget: u32,
    entries: Vec<RootEntry>,
    mappings: Vec<BindingMapping>,
    resource_table: Option<u32>,
    sampler_table: Option<u32>,
}

impl BindingLayout {
    /// Compile `parameters` against the default budget.
    pub fn compile(parameters: &[BindParameterDesc]) -> FrameResult<Self> {
        Self::compile_with_budget(parameters, DEFAULT_BUDGET_WORDS)
    }

    /// Compile `parameters` against a budget of `budget` words.
    pub fn compile_with_budget(parameters: &[BindParameterDesc], budget: u32) -> FrameResult<Self> {
        frameflow_core::profile_function!();

        validate(parameters)?;

        let mut flexible = Vec::new();
        let mut tabled = Vec::new();
        let mut samplers = Vec::new();
        for desc in parameters {
            match desc.parameter.kind {
                BindKind::Constant => flexible.push(*desc),
                BindKind::Texture | BindKind::Unordered => tabled.push(*desc),
                BindKind::Sampler => samplers.push(*desc),
            }
        }

        // Ascending by size (dynamic sizes last), least frequently changing last.
        flexible.sort_by_key(|desc| {
            let size = if desc.size == 0 { u32::MAX } else { desc.size };
            (size, std::cmp::Reverse(desc.change_frequency), desc.parameter)
        });

        let mut placements: Vec<Placement> = flexible
            .iter()
            .map(|desc| match desc.size {
                0 => Placement::BufferView,
                size => Placement::Inline(size.div_ceil(4)),
            })
            .collect();

        let footprint = |placements: &[Placement], tabled: usize, samplers: usize| -> u32 {
            placements.iter().map(|p| p.cost()).sum::<u32>()
                + if tabled > 0 { TABLE_WORDS } else { 0 }
                + if samplers > 0 { TABLE_WORDS } else { 0 }
        };

        let mut required = footprint(&placements, tabled.len(), samplers.len());
        if required > budget {
            for placement in placements.iter_mut().rev() {
                if required <= budget {
                    break;
                }
                if let Placement::Inline(words) = *placement {
                    if words > BUFFER_VIEW_WORDS {
                        *placement = Placement::BufferView;
                        required -= words - BUFFER_VIEW_WORDS;
                    }
                }
            }
        }
        while required > budget && !flexible.is_empty() {
            if let Some(desc) = flexible.pop() {
                placements.pop();
                tabled.push(desc);
            }
            required = footprint(&placements, tabled.len(), samplers.len());
        }
        if required > budget {
            return Err(FrameError::CapacityExceeded { required, budget });
        }

        let mut entries = Vec::new();
        let mut mappings = Vec::with_capacity(parameters.len());

        for (desc, placement) in flexible.iter().zip(&placements) {
            let slot = entries.len() as u32;
            entries.push(match *placement {
                Placement::Inline(words) => RootEntry::Constants {
                    words,
                    visibility: desc.visibility,
                },
                Placement::BufferView => RootEntry::ConstantBufferView {
                    visibility: desc.visibility,
                },
            });
            mappings.push(BindingMapping {
                parameter: desc.parameter,
                slot,
                table_offset: None,
            });
        }

        let resource_table = build_table(TableKind::Resources, tabled, &mut entries, &mut mappings);
        let sampler_table = build_table(TableKind::Samplers, samplers, &mut entries, &mut mappings);

        mappings.sort_by_key(|mapping| mapping.parameter);

        let layout = Self {
            id: NEXT_LAYOUT_ID.fetch_add(1, Ordering::Relaxed),
            budget,
            entries,
            mappings,
            resource_table,
            sampler_table,
        };
        log::debug!(
            "Compiled binding layout {} with {} root entries, {} of {budget} words",
            layout.id,
            layout.entries.len(),
            layout.footprint()
        );
        Ok(layout)
    }

    /// Process-unique layout id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Root entries in slot order.
    pub fn entries(&self) -> &[RootEntry] {
        &self.entries
    }

    pub fn entry(&self, slot: u32) -> Option<&RootEntry> {
        self.entries.get(slot as usize)
    }

    /// Words used out of the budget.
    pub fn footprint(&self) -> u32 {
        self.entries.iter().map(RootEntry::cost).sum()
    }

    /// Parameter mappings, sorted by parameter.
    pub fn mappings(&self) -> &[BindingMapping] {
        &self.mappings
    }

    pub fn resource_table_slot(&self) -> Option<u32> {
        self.resource_table
    }

    pub fn sampler_table_slot(&self) -> Option<u32> {
        self.sampler_table
    }

    /// Look up where `parameter` is bound.
    pub fn resolve(&self, parameter: &BindParameter) -> FrameResult<BindingMapping> {
        self.mappings
            .binary_search_by(|mapping| mapping.parameter.cmp(parameter))
            .map(|index| self.mappings[index])
            .map_err(|_| {
                FrameError::InvalidBinding(format!(
                    "{:?} register {} space {} is not part of layout {}",
                    parameter.kind, parameter.register, parameter.space, self.id
                ))
            })
    }
}

fn validate(parameters: &[BindParameterDesc]) -> FrameResult<()> {
    let mut seen: Vec<BindParameter> = parameters.iter().map(|desc| desc.parameter).collect();
    seen.sort();
    if let Some(pair) = seen.windows(2).find(|pair| pair[0] == pair[1]) {
        return Err(FrameError::InvalidBinding(format!(
            "duplicate parameter {:?}",
            pair[0]
        )));
    }

    for desc in parameters {
        if desc.parameter.kind == BindKind::Constant && desc.size % 4 != 0 {
            return Err(FrameError::InvalidBinding(format!(
                "constants at register {} have size {} which is not a multiple of 4",
                desc.parameter.register, desc.size
            )));
        }
    }
    Ok(())
}

fn build_table(
    kind: TableKind,
    mut parameters: Vec<BindParameterDesc>,
    entries: &mut Vec<RootEntry>,
    mappings: &mut Vec<BindingMapping>,
) -> Option<u32> {
    if parameters.is_empty() {
        return None;
    }

    parameters.sort_by_key(|desc| desc.parameter);
    let slot = entries.len() as u32;
    let mut ranges: Vec<TableRange> = Vec::new();

    for (offset, desc) in parameters.iter().enumerate() {
        let parameter = desc.parameter;
        let offset = offset as u32;
        match ranges.last_mut() {
            Some(range)
                if range.kind == parameter.kind
                    && range.space == parameter.space
                    && range.base_register + range.count == parameter.register =>
            {
                range.count += 1;
            }
            _ => ranges.push(TableRange {
                kind: parameter.kind,
                space: parameter.space,
                base_register: parameter.register,
                count: 1,
                offset,
            }),
        }
        mappings.push(BindingMapping {
            parameter,
            slot,
            table_offset: Some(offset),
        });
    }

    entries.push(RootEntry::Table { kind, ranges });
    Some(slot)
}
