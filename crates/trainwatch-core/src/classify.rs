//! Failure message classification.
//!
//! Maps raw engine failure text onto a small taxonomy with remediation
//! suggestions. Pure and deterministic: the rule table is scanned in order and
//! the first rule with a matching pattern wins.

use serde::{Deserialize, Serialize};

/// Longest excerpt of the raw message kept in a classification.
pub const MAX_EXCERPT_CHARS: usize = 500;

/// Longest excerpt shown to a human in `render`.
pub const MAX_RENDERED_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Hardware,
    Oom,
    DriverMismatch,
    RuntimeUnavailable,
    NoDevice,
    HostMemory,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub title: String,
    pub suggestions: Vec<String>,
    pub raw_excerpt: String,
}

impl ErrorClassification {
    /// Human-readable rendering with a shorter excerpt.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("{}: {}", self.title, truncate_chars(&self.raw_excerpt, MAX_RENDERED_CHARS));
        for suggestion in &self.suggestions {
            out.push_str("\n  - ");
            out.push_str(suggestion);
        }
        out
    }
}

struct Rule {
    /// Each inner slice is one pattern; every substring in it must occur.
    patterns: &'static [&'static [&'static str]],
    kind: ErrorKind,
    title: &'static str,
    suggestions: &'static [&'static str],
}

// Order matters: host allocator failures before device OOM, and "no device"
// before the generic CUDA rules since those messages also mention cuda.
const RULES: &[Rule] = &[
    Rule {
        patterns: &[
            &["defaultcpuallocator"],
            &["unable to allocate"],
            &["cannot allocate memory"],
            &["not enough memory"],
            &["std::bad_alloc"],
        ],
        kind: ErrorKind::HostMemory,
        title: "Host memory exhausted",
        suggestions: &[
            "Reduce the number of dataloader workers",
            "Disable image caching (cache_images = false)",
            "Reduce batch size or image size",
            "Close other memory-intensive applications",
        ],
    },
    Rule {
        patterns: &[&["out of memory"], &["outofmemoryerror"], &["cudamalloc"], &["cuda_error_out_of_memory"]],
        kind: ErrorKind::Oom,
        title: "GPU out of memory",
        suggestions: &[
            "Reduce batch size (e.g. halve --batch)",
            "Reduce image size (--imgsz)",
            "Use a smaller model variant",
            "Close other processes using the GPU",
        ],
    },
    Rule {
        patterns: &[
            &["driver version is insufficient"],
            &["cuda driver version"],
            &["no kernel image is available"],
            &["cudnn version"],
            &["compiled with cuda", "mismatch"],
        ],
        kind: ErrorKind::DriverMismatch,
        title: "GPU driver and runtime version mismatch",
        suggestions: &[
            "Update the NVIDIA driver to the latest version",
            "Install a framework build matching the installed CUDA version",
        ],
    },
    Rule {
        patterns: &[
            &["no cuda gpu"],
            &["no gpu"],
            &["found no nvidia driver"],
            &["invalid device ordinal"],
            &["no cuda-capable device"],
        ],
        kind: ErrorKind::NoDevice,
        title: "No GPU detected",
        suggestions: &[
            "Confirm the NVIDIA driver is installed and the GPU is visible (nvidia-smi)",
            "Check the --device index",
            "Set --device cpu to train on the CPU",
        ],
    },
    Rule {
        patterns: &[
            &["cuda is not available"],
            &["not compiled with cuda"],
            &["cudnn_status_not_initialized"],
            &["cuda unavailable"],
        ],
        kind: ErrorKind::RuntimeUnavailable,
        title: "GPU runtime unavailable",
        suggestions: &[
            "Install a CUDA-enabled build of the training framework",
            "Set --device cpu to train on the CPU",
        ],
    },
    Rule {
        patterns: &[
            &["cuda", "error"],
            &["cuda", "failed"],
            &["device-side assert"],
            &["cublas_status"],
            &["nccl"],
        ],
        kind: ErrorKind::Hardware,
        title: "GPU error",
        suggestions: &[
            "The CUDA version may not match the GPU driver",
            "Update the NVIDIA driver to the latest version",
            "Re-run with CUDA_LAUNCH_BLOCKING=1 for a precise stack trace",
        ],
    },
];

const UNKNOWN_SUGGESTIONS: &[&str] = &[
    "Check the training log for the full error",
    "Verify the dataset configuration and paths",
    "Re-run with --log-level debug for more detail",
];

/// Classifies a raw failure message.
#[must_use]
pub fn classify(message: &str) -> ErrorClassification {
    let lower = message.to_lowercase();
    let raw_excerpt = truncate_chars(message.trim(), MAX_EXCERPT_CHARS);

    let rule = RULES
        .iter()
        .find(|rule| rule.patterns.iter().any(|pattern| pattern.iter().all(|needle| lower.contains(needle))));

    match rule {
        Some(rule) => ErrorClassification {
            kind: rule.kind,
            title: rule.title.to_string(),
            suggestions: rule.suggestions.iter().map(|s| (*s).to_string()).collect(),
            raw_excerpt,
        },
        None => ErrorClassification {
            kind: ErrorKind::Unknown,
            title: "Training error".to_string(),
            suggestions: UNKNOWN_SUGGESTIONS.iter().map(|s| (*s).to_string()).collect(),
            raw_excerpt,
        },
    }
}

/// Truncates to at most `max` characters without splitting a code point.
fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cuda_oom_is_oom() {
        let c = classify("RuntimeError: CUDA out of memory. Tried to allocate 20.00 MiB");
        assert_eq!(c.kind, ErrorKind::Oom);
        assert!(!c.suggestions.is_empty());
        assert!(c.suggestions.iter().any(|s| s.to_lowercase().contains("batch size")));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let msg = "RuntimeError: CUDA error: device-side assert triggered";
        assert_eq!(classify(msg), classify(msg));
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(classify("cuda OUT OF MEMORY").kind, ErrorKind::Oom);
    }

    #[test]
    fn test_host_memory_before_device_oom() {
        let c = classify("[enforce fail at alloc_cpu.cpp] DefaultCPUAllocator: not enough memory");
        assert_eq!(c.kind, ErrorKind::HostMemory);
    }

    #[test]
    fn test_torch_oom_exception_name() {
        assert_eq!(classify("torch.cuda.OutOfMemoryError").kind, ErrorKind::Oom);
        assert_eq!(classify("numpy: Unable to allocate 3.1 GiB").kind, ErrorKind::HostMemory);
    }

    #[test]
    fn test_no_device_before_generic_cuda() {
        let c = classify("RuntimeError: No CUDA GPUs are available");
        assert_eq!(c.kind, ErrorKind::NoDevice);
    }

    #[test]
    fn test_runtime_unavailable() {
        let c = classify("AssertionError: Torch not compiled with CUDA enabled");
        assert_eq!(c.kind, ErrorKind::RuntimeUnavailable);
        let c = classify("CUDA is not available on this machine");
        assert_eq!(c.kind, ErrorKind::RuntimeUnavailable);
    }

    #[test]
    fn test_driver_mismatch() {
        let c = classify("CUDA driver version is insufficient for CUDA runtime version");
        assert_eq!(c.kind, ErrorKind::DriverMismatch);
    }

    #[test]
    fn test_all_substrings_of_pattern_required() {
        assert_eq!(classify("CUDA kernel launch failed").kind, ErrorKind::Hardware);
        assert_eq!(classify("cuda toolkit located").kind, ErrorKind::Unknown);
    }

    #[test]
    fn test_unknown_fallback() {
        let c = classify("FileNotFoundError: data.yaml");
        assert_eq!(c.kind, ErrorKind::Unknown);
        assert!(!c.suggestions.is_empty());
    }

    #[test]
    fn test_excerpt_truncation() {
        let long = "é".repeat(800);
        let c = classify(&long);
        assert_eq!(c.raw_excerpt.chars().count(), MAX_EXCERPT_CHARS);
        let rendered = c.render();
        let first_line = rendered.lines().next().unwrap();
        let excerpt = first_line.split_once(": ").unwrap().1;
        assert_eq!(excerpt.chars().count(), MAX_RENDERED_CHARS);
    }

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(serde_json::to_string(&ErrorKind::DriverMismatch).unwrap(), "\"driver_mismatch\"");
        assert_eq!(serde_json::to_string(&ErrorKind::Oom).unwrap(), "\"oom\"");
    }
}
