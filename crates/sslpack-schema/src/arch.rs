//! Host CPU width.

/// CPU width of a download slot.
///
/// Dependency descriptors may publish separate 32-bit and 64-bit
/// downloads. The host width decides which one is fetched, falling back
/// to the width-agnostic `download` entry.
///
/// # Example
///
/// ```
/// use sslpack_schema::CpuWidth;
///
/// let current = CpuWidth::current();
/// println!("Fetching {} downloads", current);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum CpuWidth {
    /// 32-bit x86 (`download_x86`).
    X86,
    /// 64-bit x86 (`download_x64`).
    #[default]
    X64,
}

impl CpuWidth {
    /// Width of the running host.
    pub fn current() -> Self {
        #[cfg(target_pointer_width = "64")]
        {
            Self::X64
        }
        #[cfg(not(target_pointer_width = "64"))]
        {
            Self::X86
        }
    }

    /// Convert to string representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::X86 => "x86",
            Self::X64 => "x64",
        }
    }
}

impl std::fmt::Display for CpuWidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CpuWidth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "x86" | "win32" | "i686" => Ok(Self::X86),
            "x64" | "win64" | "x86_64" | "amd64" => Ok(Self::X64),
            _ => Err(format!("Unknown CPU width: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_spellings() {
        assert_eq!("Win64".parse::<CpuWidth>().unwrap(), CpuWidth::X64);
        assert_eq!("x86".parse::<CpuWidth>().unwrap(), CpuWidth::X86);
        assert!("arm64".parse::<CpuWidth>().is_err());
    }

    #[test]
    fn display_matches_descriptor_suffix() {
        assert_eq!(CpuWidth::X86.to_string(), "x86");
        assert_eq!(CpuWidth::X64.to_string(), "x64");
    }
}
