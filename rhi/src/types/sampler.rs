//! Sampler filter, address and comparison modes.

/// Texture filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    /// Nearest-neighbor filtering.
    Nearest,
    /// Linear filtering.
    #[default]
    Linear,
    /// Anisotropic filtering (implies linear min/mag/mip).
    Anisotropic,
}

/// Texture coordinate addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    /// Repeat the texture.
    #[default]
    Wrap,
    /// Repeat with mirroring.
    Mirror,
    /// Clamp to the edge texel.
    Clamp,
    /// Clamp to a border color.
    Border,
}

/// Comparison function for depth testing and comparison samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunction {
    /// Never passes.
    Never,
    /// Passes if new < existing.
    #[default]
    Less,
    /// Passes if new == existing.
    Equal,
    /// Passes if new <= existing.
    LessEqual,
    /// Passes if new > existing.
    Greater,
    /// Passes if new != existing.
    NotEqual,
    /// Passes if new >= existing.
    GreaterEqual,
    /// Always passes.
    Always,
}
