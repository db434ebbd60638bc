//! Binding layout (root signature) construction.
//!
//! A binding layout declares which resources a pipeline expects and at which
//! shader registers. [`RootSignatureBuilder`] accumulates three kinds of slot,
//! in caller order:
//!
//! - root constant buffers, bound directly by address
//! - descriptor tables, each one or more ranges of SRV/UAV/CBV registers
//! - static samplers baked into the layout
//!
//! Table ranges live in a single arena owned by the builder; each table keeps
//! an index span into it, so adding more tables never invalidates earlier
//! ones. [`RootSignatureBuilder::finalize`] resolves the spans into owned
//! ranges once all declarations are in.
//!
//! Layouts are shared via `Arc`, so pipelines built against the same layout
//! can be grouped by pointer comparison.
//!
//! # Example
//!
//! ```ignore
//! let builder = RootSignatureBuilder::new()
//!     .with_label("sprite")
//!     .with_constant_buffer(0, ShaderVisibility::Vertex)
//!     .with_descriptor_table(&[DescriptorRange::srv(0, 1)], ShaderVisibility::Pixel)
//!     .with_static_sampler(StaticSampler::new(0, FilterMode::Linear, AddressMode::Clamp));
//!
//! let layout = builder.build(&device)?;
//! ```

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::backend::GpuRootSignature;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::{AddressMode, CompareFunction, FilterMode, ShaderVisibility};

/// Upper bound on the size of a binding layout, in 32-bit words.
pub const MAX_ROOT_COST_DWORDS: u32 = 64;

/// Words consumed by a root constant buffer address.
const ROOT_CBV_COST: u32 = 2;

/// Words consumed by a descriptor table pointer.
const TABLE_COST: u32 = 1;

/// Kind of descriptors a table range covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorRangeType {
    /// Shader resource views (`t` registers).
    Srv,
    /// Unordered access views (`u` registers).
    Uav,
    /// Constant buffer views (`b` registers).
    Cbv,
}

impl DescriptorRangeType {
    fn register_class(self) -> RegisterClass {
        match self {
            Self::Srv => RegisterClass::Srv,
            Self::Uav => RegisterClass::Uav,
            Self::Cbv => RegisterClass::Cbv,
        }
    }
}

/// One contiguous run of registers inside a descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorRange {
    /// Descriptor kind.
    pub range_type: DescriptorRangeType,
    /// First register.
    pub base_register: u32,
    /// Number of registers.
    pub count: u32,
    /// Register space.
    pub register_space: u32,
}

impl DescriptorRange {
    /// Create a range in register space 0.
    pub fn new(range_type: DescriptorRangeType, base_register: u32, count: u32) -> Self {
        Self {
            range_type,
            base_register,
            count,
            register_space: 0,
        }
    }

    /// Shader resource views `t{base}..t{base + count}`.
    pub fn srv(base_register: u32, count: u32) -> Self {
        Self::new(DescriptorRangeType::Srv, base_register, count)
    }

    /// Unordered access views `u{base}..u{base + count}`.
    pub fn uav(base_register: u32, count: u32) -> Self {
        Self::new(DescriptorRangeType::Uav, base_register, count)
    }

    /// Constant buffer views `b{base}..b{base + count}`.
    pub fn cbv(base_register: u32, count: u32) -> Self {
        Self::new(DescriptorRangeType::Cbv, base_register, count)
    }

    /// Set the register space.
    pub fn with_register_space(mut self, space: u32) -> Self {
        self.register_space = space;
        self
    }

    fn registers(&self) -> Range<u64> {
        let start = self.base_register as u64;
        start..start + self.count as u64
    }
}

/// A sampler baked into the binding layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StaticSampler {
    /// Sampler register (`s` register).
    pub register: u32,
    /// Register space.
    pub register_space: u32,
    /// Min/mag/mip filter.
    pub filter: FilterMode,
    /// Addressing mode for all three coordinates.
    pub address_mode: AddressMode,
    /// Comparison function for shadow sampling.
    pub comparison: Option<CompareFunction>,
    /// Maximum anisotropy when `filter` is anisotropic.
    pub max_anisotropy: u32,
    /// Stages that see the sampler.
    pub visibility: ShaderVisibility,
}

impl StaticSampler {
    /// Create a sampler visible to every stage.
    pub fn new(register: u32, filter: FilterMode, address_mode: AddressMode) -> Self {
        Self {
            register,
            register_space: 0,
            filter,
            address_mode,
            comparison: None,
            max_anisotropy: 16,
            visibility: ShaderVisibility::All,
        }
    }

    /// Restrict the sampler to some stages.
    pub fn with_visibility(mut self, visibility: ShaderVisibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Turn this into a comparison sampler.
    pub fn with_comparison(mut self, compare: CompareFunction) -> Self {
        self.comparison = Some(compare);
        self
    }
}

/// A resolved binding slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RootParameter {
    /// Constant buffer bound by address.
    ConstantBuffer {
        /// `b` register.
        register: u32,
        /// Register space.
        register_space: u32,
        /// Stages that see the buffer.
        visibility: ShaderVisibility,
    },
    /// Pointer into the shader-visible descriptor heap.
    DescriptorTable {
        /// Ranges, in declaration order.
        ranges: Vec<DescriptorRange>,
        /// Stages that see the table.
        visibility: ShaderVisibility,
    },
}

impl RootParameter {
    /// Size of this parameter in 32-bit words.
    pub fn cost(&self) -> u32 {
        match self {
            Self::ConstantBuffer { .. } => ROOT_CBV_COST,
            Self::DescriptorTable { .. } => TABLE_COST,
        }
    }
}

/// Flattened binding layout description handed to the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RootSignatureDesc {
    /// Binding slots in declaration order.
    pub parameters: Vec<RootParameter>,
    /// Static samplers in declaration order.
    pub static_samplers: Vec<StaticSampler>,
}

impl RootSignatureDesc {
    /// Total size in 32-bit words.
    pub fn cost(&self) -> u32 {
        self.parameters.iter().map(RootParameter::cost).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegisterClass {
    Cbv,
    Srv,
    Uav,
}

impl fmt::Display for RegisterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cbv => write!(f, "b"),
            Self::Srv => write!(f, "t"),
            Self::Uav => write!(f, "u"),
        }
    }
}

#[derive(Debug, Clone)]
enum ParameterDecl {
    ConstantBuffer {
        register: u32,
        register_space: u32,
        visibility: ShaderVisibility,
    },
    Table {
        span: Range<usize>,
        visibility: ShaderVisibility,
    },
}

/// Accumulates binding slot declarations and builds binding layouts.
///
/// Declarations are consumed builder-style; building only borrows, so one
/// builder can produce any number of independent layouts.
#[derive(Debug, Clone, Default)]
pub struct RootSignatureBuilder {
    label: Option<String>,
    ranges: Vec<DescriptorRange>,
    parameters: Vec<ParameterDecl>,
    static_samplers: Vec<StaticSampler>,
}

impl RootSignatureBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a debug label used in log output.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Declare a root constant buffer at `b{register}`.
    pub fn with_constant_buffer(mut self, register: u32, visibility: ShaderVisibility) -> Self {
        self.parameters.push(ParameterDecl::ConstantBuffer {
            register,
            register_space: 0,
            visibility,
        });
        self
    }

    /// Declare a descriptor table covering `ranges`.
    pub fn with_descriptor_table(
        mut self,
        ranges: &[DescriptorRange],
        visibility: ShaderVisibility,
    ) -> Self {
        let start = self.ranges.len();
        self.ranges.extend_from_slice(ranges);
        self.parameters.push(ParameterDecl::Table {
            span: start..self.ranges.len(),
            visibility,
        });
        self
    }

    /// Declare a static sampler.
    pub fn with_static_sampler(mut self, sampler: StaticSampler) -> Self {
        self.static_samplers.push(sampler);
        self
    }

    /// Debug label, or a placeholder.
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("unnamed")
    }

    /// Number of binding slots declared so far (static samplers excluded).
    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    /// Resolve table spans into owned ranges.
    ///
    /// No validation happens here; see [`RootSignatureBuilder::serialize`].
    pub fn finalize(&self) -> RootSignatureDesc {
        let parameters = self
            .parameters
            .iter()
            .map(|decl| match decl {
                ParameterDecl::ConstantBuffer {
                    register,
                    register_space,
                    visibility,
                } => RootParameter::ConstantBuffer {
                    register: *register,
                    register_space: *register_space,
                    visibility: *visibility,
                },
                ParameterDecl::Table { span, visibility } => RootParameter::DescriptorTable {
                    ranges: self.ranges[span.clone()].to_vec(),
                    visibility: *visibility,
                },
            })
            .collect();

        RootSignatureDesc {
            parameters,
            static_samplers: self.static_samplers.clone(),
        }
    }

    /// Finalize and validate the declarations.
    ///
    /// Returns the serializer diagnostic on failure.
    pub fn serialize(&self) -> Result<RootSignatureDesc, String> {
        let desc = self.finalize();

        // (class, space, registers, visibility, parameter index)
        let mut claimed: Vec<(RegisterClass, u32, Range<u64>, ShaderVisibility, usize)> =
            Vec::new();

        for (index, parameter) in desc.parameters.iter().enumerate() {
            match parameter {
                RootParameter::ConstantBuffer {
                    register,
                    register_space,
                    visibility,
                } => {
                    let start = *register as u64;
                    claimed.push((
                        RegisterClass::Cbv,
                        *register_space,
                        start..start + 1,
                        *visibility,
                        index,
                    ));
                }
                RootParameter::DescriptorTable { ranges, visibility } => {
                    if ranges.is_empty() {
                        return Err(format!("parameter {index}: descriptor table has no ranges"));
                    }
                    for range in ranges {
                        if range.count == 0 {
                            return Err(format!(
                                "parameter {index}: {:?} range at register {} has zero descriptors",
                                range.range_type, range.base_register
                            ));
                        }
                        claimed.push((
                            range.range_type.register_class(),
                            range.register_space,
                            range.registers(),
                            *visibility,
                            index,
                        ));
                    }
                }
            }
        }

        for (i, (class, space, registers, visibility, owner)) in claimed.iter().enumerate() {
            for (other_class, other_space, other_registers, other_visibility, other_owner) in
                &claimed[i + 1..]
            {
                if class == other_class
                    && space == other_space
                    && visibility.overlaps(*other_visibility)
                    && registers.start < other_registers.end
                    && other_registers.start < registers.end
                {
                    let register = registers.start.max(other_registers.start);
                    return Err(format!(
                        "register {class}{register} (space {space}) declared by \
                         parameters {owner} and {other_owner}"
                    ));
                }
            }
        }

        let cost = desc.cost();
        if cost > MAX_ROOT_COST_DWORDS {
            return Err(format!(
                "binding layout costs {cost} DWORDs, limit is {MAX_ROOT_COST_DWORDS}"
            ));
        }

        for (i, sampler) in desc.static_samplers.iter().enumerate() {
            if let Some(other) = desc.static_samplers[i + 1..].iter().find(|other| {
                other.register == sampler.register
                    && other.register_space == sampler.register_space
                    && other.visibility.overlaps(sampler.visibility)
            }) {
                return Err(format!(
                    "static sampler register s{} (space {}) declared twice",
                    other.register, other.register_space
                ));
            }
        }

        Ok(desc)
    }

    /// Serialize the declarations and create a binding layout on `device`.
    ///
    /// Failures are logged with the diagnostic text and returned as
    /// [`GraphicsError::RootSignature`].
    pub fn build(&self, device: &GraphicsDevice) -> Result<Arc<BindingLayout>, GraphicsError> {
        let desc = self.serialize().map_err(|diagnostic| {
            log::error!(
                "Binding layout '{}' failed to serialize: {diagnostic}",
                self.label()
            );
            GraphicsError::RootSignature(diagnostic)
        })?;

        let raw = device.raw().create_root_signature(&desc).map_err(|e| {
            log::error!("Device rejected binding layout '{}': {e}", self.label());
            GraphicsError::RootSignature(e.to_string())
        })?;

        log::debug!(
            "Created binding layout '{}' ({} parameters, {} static samplers, {} DWORDs)",
            self.label(),
            desc.parameters.len(),
            desc.static_samplers.len(),
            desc.cost()
        );

        Ok(Arc::new(BindingLayout {
            label: self.label.clone(),
            desc,
            raw,
        }))
    }
}

/// A compiled, immutable binding layout.
#[derive(Debug)]
pub struct BindingLayout {
    label: Option<String>,
    desc: RootSignatureDesc,
    raw: GpuRootSignature,
}

impl BindingLayout {
    /// Debug label.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// The description the layout was built from.
    pub fn desc(&self) -> &RootSignatureDesc {
        &self.desc
    }

    /// Backend handle.
    pub fn raw(&self) -> &GpuRootSignature {
        &self.raw
    }

    /// Returns true if the backend handle is non-null.
    pub fn is_valid(&self) -> bool {
        !self.raw.is_null()
    }
}

static_assertions::assert_impl_all!(BindingLayout: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_preserves_declaration_order() {
        let builder = RootSignatureBuilder::new()
            .with_descriptor_table(&[DescriptorRange::srv(0, 2)], ShaderVisibility::Pixel)
            .with_constant_buffer(0, ShaderVisibility::Vertex)
            .with_descriptor_table(
                &[DescriptorRange::uav(0, 1), DescriptorRange::cbv(1, 1)],
                ShaderVisibility::All,
            );

        let desc = builder.finalize();
        assert_eq!(desc.parameters.len(), 3);
        assert!(matches!(
            &desc.parameters[0],
            RootParameter::DescriptorTable { ranges, .. } if ranges == &[DescriptorRange::srv(0, 2)]
        ));
        assert!(matches!(
            &desc.parameters[2],
            RootParameter::DescriptorTable { ranges, .. } if ranges.len() == 2
        ));
    }

    #[test]
    fn test_tables_survive_arena_growth() {
        let mut builder = RootSignatureBuilder::new()
            .with_descriptor_table(&[DescriptorRange::srv(0, 1)], ShaderVisibility::Pixel);
        for i in 1..32 {
            builder = builder
                .with_descriptor_table(&[DescriptorRange::srv(i, 1)], ShaderVisibility::Pixel);
        }
        let desc = builder.serialize().unwrap();
        assert!(matches!(
            &desc.parameters[0],
            RootParameter::DescriptorTable { ranges, .. } if ranges[0].base_register == 0
        ));
        assert_eq!(desc.cost(), 32);
    }

    #[test]
    fn test_empty_table_rejected() {
        let builder = RootSignatureBuilder::new().with_descriptor_table(&[], ShaderVisibility::All);
        assert!(builder.serialize().unwrap_err().contains("no ranges"));
    }

    #[test]
    fn test_zero_count_rejected() {
        let builder = RootSignatureBuilder::new()
            .with_descriptor_table(&[DescriptorRange::srv(0, 0)], ShaderVisibility::All);
        assert!(builder.serialize().is_err());
    }

    #[test]
    fn test_register_overlap_rejected() {
        let builder = RootSignatureBuilder::new()
            .with_constant_buffer(1, ShaderVisibility::All)
            .with_descriptor_table(&[DescriptorRange::cbv(0, 4)], ShaderVisibility::Pixel);
        let err = builder.serialize().unwrap_err();
        assert!(err.contains("b1"), "{err}");
    }

    #[test]
    fn test_disjoint_visibility_may_share_registers() {
        let builder = RootSignatureBuilder::new()
            .with_constant_buffer(0, ShaderVisibility::Vertex)
            .with_constant_buffer(0, ShaderVisibility::Pixel);
        assert!(builder.serialize().is_ok());
    }

    #[test]
    fn test_different_classes_do_not_clash() {
        let builder = RootSignatureBuilder::new()
            .with_constant_buffer(0, ShaderVisibility::All)
            .with_descriptor_table(
                &[DescriptorRange::srv(0, 1), DescriptorRange::uav(0, 1)],
                ShaderVisibility::All,
            );
        assert!(builder.serialize().is_ok());
    }

    #[test]
    fn test_cost_limit() {
        let mut builder = RootSignatureBuilder::new();
        for register in 0..33 {
            builder = builder.with_constant_buffer(register, ShaderVisibility::All);
        }
        assert!(builder.serialize().unwrap_err().contains("DWORDs"));
    }

    #[test]
    fn test_sampler_clash_rejected() {
        let builder = RootSignatureBuilder::new()
            .with_static_sampler(StaticSampler::new(0, FilterMode::Linear, AddressMode::Wrap))
            .with_static_sampler(StaticSampler::new(0, FilterMode::Nearest, AddressMode::Clamp));
        assert!(builder.serialize().unwrap_err().contains("s0"));
    }
}
