//! Shader compilation.
//!
//! Shaders are WGSL text files on disk, referenced by path, entry point and a
//! target profile tag such as `vs_6_0`. [`ShaderCompiler`] runs them through
//! naga (WGSL front end, validator, SPIR-V back end) with a fixed set of
//! baseline options taken from [`ShaderCompileOptions`].
//!
//! Compilation failures are authoring errors, caught during development:
//! [`ShaderCompiler::compile`] treats any of them as fatal.
//! [`ShaderCompiler::try_compile`] returns the full diagnostic instead, for
//! tooling that wants to report it.
//!
//! # Example
//!
//! ```ignore
//! let compiler = ShaderCompiler::new(config.shader);
//! let vs = compiler.compile("shaders/sprite.wgsl", "vs_main", "vs_6_0");
//! let ps = compiler.compile("shaders/sprite.wgsl", "ps_main", "ps_6_0");
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::ShaderCompileOptions;
use crate::error::{GraphicsError, OrFatal};

/// Pipeline stage a shader runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex shader.
    Vertex,
    /// Pixel (fragment) shader.
    Pixel,
    /// Compute shader.
    Compute,
}

impl ShaderStage {
    fn prefix(self) -> &'static str {
        match self {
            Self::Vertex => "vs",
            Self::Pixel => "ps",
            Self::Compute => "cs",
        }
    }

    fn to_naga(self) -> naga::ShaderStage {
        match self {
            Self::Vertex => naga::ShaderStage::Vertex,
            Self::Pixel => naga::ShaderStage::Fragment,
            Self::Compute => naga::ShaderStage::Compute,
        }
    }
}

/// Parsed target profile tag, `<stage>_<major>_<minor>`.
///
/// Only shader model 6 is accepted; the minor version picks the SPIR-V
/// version (6.0 → SPIR-V 1.0, up to 6.6 → SPIR-V 1.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetProfile {
    /// Stage.
    pub stage: ShaderStage,
    /// Shader model major version.
    pub major: u8,
    /// Shader model minor version.
    pub minor: u8,
}

impl TargetProfile {
    /// Highest SPIR-V minor version the backend emits.
    const MAX_SPIRV_MINOR: u8 = 6;

    /// Parse a tag such as `ps_6_0`.
    pub fn parse(tag: &str) -> Result<Self, GraphicsError> {
        let invalid = || GraphicsError::InvalidParameter(format!("invalid target profile '{tag}'"));

        let mut parts = tag.split('_');
        let stage = match parts.next() {
            Some("vs") => ShaderStage::Vertex,
            Some("ps") => ShaderStage::Pixel,
            Some("cs") => ShaderStage::Compute,
            _ => return Err(invalid()),
        };
        let major: u8 = parts.next().and_then(|s| s.parse().ok()).ok_or_else(invalid)?;
        let minor: u8 = parts.next().and_then(|s| s.parse().ok()).ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        if major != 6 {
            return Err(GraphicsError::FeatureNotSupported(format!(
                "shader model {major}.{minor} in '{tag}'; only 6.x is supported"
            )));
        }

        Ok(Self {
            stage,
            major,
            minor,
        })
    }

    /// SPIR-V version to emit.
    pub fn spirv_version(&self) -> (u8, u8) {
        (1, self.minor.min(Self::MAX_SPIRV_MINOR))
    }
}

impl fmt::Display for TargetProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.stage.prefix(), self.major, self.minor)
    }
}

/// Compiled shader stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBinary {
    bytecode: Vec<u32>,
    source_path: PathBuf,
    entry_point: String,
    target_profile: TargetProfile,
}

impl ShaderBinary {
    /// SPIR-V words.
    pub fn bytecode(&self) -> &[u32] {
        &self.bytecode
    }

    /// SPIR-V as a byte stream, for writing to disk or hashing.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.bytecode)
    }

    /// File the shader was compiled from.
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Entry point name.
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Profile the shader was compiled for.
    pub fn target_profile(&self) -> TargetProfile {
        self.target_profile
    }

    /// Stage the shader runs in.
    pub fn stage(&self) -> ShaderStage {
        self.target_profile.stage
    }
}

/// WGSL to SPIR-V compiler.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShaderCompiler {
    options: ShaderCompileOptions,
}

impl ShaderCompiler {
    /// Create a compiler with the given baseline options.
    pub fn new(options: ShaderCompileOptions) -> Self {
        Self { options }
    }

    /// Baseline options.
    pub fn options(&self) -> &ShaderCompileOptions {
        &self.options
    }

    /// Compile `entry_point` from the file at `path`.
    ///
    /// # Panics
    ///
    /// Any load, parse, validation or code generation error is fatal.
    #[track_caller]
    pub fn compile(
        &self,
        path: impl AsRef<Path>,
        entry_point: &str,
        target_profile: &str,
    ) -> ShaderBinary {
        let path = path.as_ref();
        self.try_compile(path, entry_point, target_profile)
            .or_fatal(&format!("shader '{}' ({entry_point})", path.display()))
    }

    /// Fallible form of [`ShaderCompiler::compile`].
    pub fn try_compile(
        &self,
        path: impl AsRef<Path>,
        entry_point: &str,
        target_profile: &str,
    ) -> Result<ShaderBinary, GraphicsError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            GraphicsError::ShaderCompilationFailed(format!(
                "failed to read '{}': {e}",
                path.display()
            ))
        })?;
        self.compile_source(&source, path, entry_point, target_profile)
    }

    /// Compile `entry_point` from in-memory WGSL.
    ///
    /// `source_path` is only recorded in the binary and in diagnostics.
    pub fn compile_source(
        &self,
        source: &str,
        source_path: impl AsRef<Path>,
        entry_point: &str,
        target_profile: &str,
    ) -> Result<ShaderBinary, GraphicsError> {
        crate::profile_scope!("compile_shader");

        let source_path = source_path.as_ref();
        let profile = TargetProfile::parse(target_profile)?;
        let stage = profile.stage.to_naga();

        let module = naga::front::wgsl::parse_str(source).map_err(|e| {
            GraphicsError::ShaderCompilationFailed(format!(
                "{}: {}",
                source_path.display(),
                e.emit_to_string(source)
            ))
        })?;

        if !module
            .entry_points
            .iter()
            .any(|ep| ep.name == entry_point && ep.stage == stage)
        {
            return Err(GraphicsError::ShaderCompilationFailed(format!(
                "{}: no {:?} entry point named '{entry_point}'",
                source_path.display(),
                profile.stage
            )));
        }

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        let info = validator.validate(&module).map_err(|e| {
            GraphicsError::ShaderCompilationFailed(format!(
                "{}: validation failed: {e}",
                source_path.display()
            ))
        })?;

        let options = self.spirv_options(profile);
        let pipeline_options = naga::back::spv::PipelineOptions {
            shader_stage: stage,
            entry_point: entry_point.to_string(),
        };
        let bytecode = naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options))
            .map_err(|e| {
                GraphicsError::ShaderCompilationFailed(format!(
                    "{}: SPIR-V generation failed: {e}",
                    source_path.display()
                ))
            })?;

        log::debug!(
            "Compiled {} ({entry_point}, {profile}): {} words",
            source_path.display(),
            bytecode.len()
        );

        Ok(ShaderBinary {
            bytecode,
            source_path: source_path.to_path_buf(),
            entry_point: entry_point.to_string(),
            target_profile: profile,
        })
    }

    fn spirv_options(&self, profile: TargetProfile) -> naga::back::spv::Options<'static> {
        use naga::back::spv::WriterFlags;
        use naga::proc::{BoundsCheckPolicies, BoundsCheckPolicy};

        let mut flags = WriterFlags::empty();
        if self.options.debug_info {
            flags |= WriterFlags::DEBUG;
        }
        if self.options.adjust_coordinate_space {
            flags |= WriterFlags::ADJUST_COORDINATE_SPACE;
        }

        let policy = if self.options.optimize {
            BoundsCheckPolicy::Unchecked
        } else {
            BoundsCheckPolicy::Restrict
        };

        naga::back::spv::Options {
            lang_version: profile.spirv_version(),
            flags,
            bounds_check_policies: BoundsCheckPolicies {
                index: policy,
                buffer: policy,
                ..BoundsCheckPolicies::default()
            },
            debug_info: None,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIANGLE: &str = r#"
@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let x = f32(i32(index) - 1);
    let y = f32(i32(index & 1u) * 2 - 1);
    return vec4<f32>(x, y, 0.0, 1.0);
}

@fragment
fn ps_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.5, 0.0, 1.0);
}
"#;

    #[test]
    fn test_parse_profile() {
        let profile = TargetProfile::parse("ps_6_2").unwrap();
        assert_eq!(profile.stage, ShaderStage::Pixel);
        assert_eq!(profile.spirv_version(), (1, 2));
        assert_eq!(profile.to_string(), "ps_6_2");
        assert_eq!(TargetProfile::parse("vs_6_9").unwrap().spirv_version(), (1, 6));
    }

    #[test]
    fn test_parse_profile_rejects_garbage() {
        assert!(TargetProfile::parse("gs_6_0").is_err());
        assert!(TargetProfile::parse("vs_6").is_err());
        assert!(TargetProfile::parse("vs_5_1").is_err());
        assert!(TargetProfile::parse("vs_6_0_1").is_err());
    }

    #[test]
    fn test_compile_source() {
        let compiler = ShaderCompiler::default();
        let vs = compiler
            .compile_source(TRIANGLE, "triangle.wgsl", "vs_main", "vs_6_0")
            .unwrap();
        assert_eq!(vs.bytecode()[0], 0x0723_0203);
        assert_eq!(vs.stage(), ShaderStage::Vertex);
        assert_eq!(vs.entry_point(), "vs_main");
        assert_eq!(vs.as_bytes().len(), vs.bytecode().len() * 4);
        assert_eq!(vs.as_bytes()[..4], 0x0723_0203u32.to_ne_bytes());

        let ps = compiler
            .compile_source(TRIANGLE, "triangle.wgsl", "ps_main", "ps_6_0")
            .unwrap();
        assert_eq!(ps.source_path(), Path::new("triangle.wgsl"));
    }

    #[test]
    fn test_wrong_stage_entry_point() {
        let compiler = ShaderCompiler::default();
        let err = compiler
            .compile_source(TRIANGLE, "triangle.wgsl", "vs_main", "ps_6_0")
            .unwrap_err();
        assert!(err.to_string().contains("vs_main"));
    }

    #[test]
    fn test_parse_error_carries_diagnostic() {
        let compiler = ShaderCompiler::default();
        let err = compiler
            .compile_source("fn broken( {", "broken.wgsl", "main", "vs_6_0")
            .unwrap_err();
        assert!(err.to_string().contains("broken.wgsl"));
    }

    #[test]
    #[should_panic(expected = "fatal graphics error")]
    fn test_missing_file_is_fatal() {
        ShaderCompiler::default().compile("does/not/exist.wgsl", "main", "vs_6_0");
    }
}
