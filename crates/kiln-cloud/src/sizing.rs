/// Memory sizes (MiB) Fargate accepts for a CPU size.
enum MemoryOptions {
    List(&'static [u32]),
    Range { min: u32, max: u32, step: u32 },
}

struct Tier {
    cpu: u32,
    memory: MemoryOptions,
}

const FARGATE_TIERS: &[Tier] = &[
    Tier {
        cpu: 256,
        memory: MemoryOptions::List(&[512, 1024, 2048]),
    },
    Tier {
        cpu: 512,
        memory: MemoryOptions::Range {
            min: 1024,
            max: 4096,
            step: 1024,
        },
    },
    Tier {
        cpu: 1024,
        memory: MemoryOptions::Range {
            min: 2048,
            max: 8192,
            step: 1024,
        },
    },
    Tier {
        cpu: 2048,
        memory: MemoryOptions::Range {
            min: 4096,
            max: 16384,
            step: 1024,
        },
    },
    Tier {
        cpu: 4096,
        memory: MemoryOptions::Range {
            min: 8192,
            max: 30720,
            step: 1024,
        },
    },
    Tier {
        cpu: 8192,
        memory: MemoryOptions::Range {
            min: 16384,
            max: 61440,
            step: 4096,
        },
    },
    Tier {
        cpu: 16384,
        memory: MemoryOptions::Range {
            min: 32768,
            max: 122880,
            step: 8192,
        },
    },
];

impl MemoryOptions {
    /// Smallest accepted size that is at least `requested`.
    fn at_least(&self, requested: u32) -> Option<u32> {
        match *self {
            MemoryOptions::List(sizes) => sizes.iter().copied().find(|&m| m >= requested),
            MemoryOptions::Range { min, max, step } => {
                let size = if requested <= min {
                    min
                } else {
                    min + (requested - min).div_ceil(step) * step
                };
                (size <= max).then_some(size)
            }
        }
    }
}

/// Snap a requested vCPU / memory pair up to the nearest combination
/// Fargate accepts. Returns `(cpu_units, memory_mib)` where 1024 CPU
/// units equal one vCPU. Requests beyond the largest size are capped.
pub fn fargate_size(vcpu: f64, memory_mib: f64) -> (u32, u32) {
    let cpu_requested = (vcpu.max(0.0) * 1024.0).ceil() as u32;
    let memory_requested = memory_mib.max(0.0).ceil() as u32;

    for tier in FARGATE_TIERS {
        if tier.cpu < cpu_requested {
            continue;
        }
        if let Some(memory) = tier.memory.at_least(memory_requested) {
            if (tier.cpu, memory) != (cpu_requested, memory_requested) {
                tracing::debug!(
                    vcpu,
                    memory_mib,
                    cpu = tier.cpu,
                    memory,
                    "adjusted task size to a valid Fargate combination"
                );
            }
            return (tier.cpu, memory);
        }
    }

    tracing::warn!(vcpu, memory_mib, "requested task size exceeds Fargate limits; capping");
    (16384, 122880)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_sizes_unchanged() {
        assert_eq!(fargate_size(0.25, 512.0), (256, 512));
        assert_eq!(fargate_size(1.0, 2048.0), (1024, 2048));
        assert_eq!(fargate_size(16.0, 122880.0), (16384, 122880));
    }

    #[test]
    fn memory_snaps_up_within_tier() {
        assert_eq!(fargate_size(0.25, 600.0), (256, 1024));
        assert_eq!(fargate_size(0.25, 1500.0), (256, 2048));
        assert_eq!(fargate_size(2.0, 5000.0), (2048, 5120));
        assert_eq!(fargate_size(8.0, 20000.0), (8192, 20480));
    }

    #[test]
    fn memory_below_tier_minimum_raised() {
        assert_eq!(fargate_size(1.0, 512.0), (1024, 2048));
        assert_eq!(fargate_size(4.0, 1024.0), (4096, 8192));
    }

    #[test]
    fn cpu_bumped_when_memory_needs_it() {
        assert_eq!(fargate_size(0.25, 3000.0), (512, 3072));
        assert_eq!(fargate_size(0.5, 6000.0), (1024, 6144));
    }

    #[test]
    fn fractional_and_tiny_requests() {
        assert_eq!(fargate_size(0.1, 100.0), (256, 512));
        assert_eq!(fargate_size(0.3, 512.0), (512, 1024));
    }

    #[test]
    fn oversized_requests_capped() {
        assert_eq!(fargate_size(64.0, 1_000_000.0), (16384, 122880));
    }
}
