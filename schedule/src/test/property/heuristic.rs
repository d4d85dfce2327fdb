//! Structural guarantees of the chosen parameters over random problem sizes.

use proptest::prelude::*;
use tessel_device::DeviceProperties;

use crate::*;

fn config() -> HeuristicConfig {
    HeuristicConfig::default()
}

proptest! {
    /// Register-resident fp32 rows: the chosen block covers the row within the device limits.
    #[test]
    fn search_block_covers_row(vectors in 256i64..=8192, iteration in 1i64..=1 << 20) {
        let reduction = vectors * 4;
        let props = PersistentKernelProperties::builder()
            .total_reduction_numel(reduction)
            .total_iteration_numel(iteration)
            .build();
        let device = DeviceProperties::a100();

        let calculator = HeuristicCalculator::new(&props, &device);
        let (lo, hi) = calculator.persistent_range();
        let best = calculator.best();
        prop_assert!(lo <= best.persistent_batch && best.persistent_batch <= hi);
        prop_assert!(best.bdimx * best.bdimy <= device.max_threads_per_block);
        prop_assert!(best.bdimx * best.persistent_batch * calculator.vectorize() >= reduction);
        prop_assert!(best.warps_per_sm <= device.max_warps_per_multiprocessor());

        let params = inner_persistent_heuristic(&props, &device, &config()).unwrap();
        prop_assert_eq!(params.heuristic, PersistentHeuristicKind::Search);
        prop_assert_eq!(params.batches_per_block_inner_reduction, best.persistent_batch);
        prop_assert_eq!(params.max_register_count, Some(best.register_per_thread));
    }

    /// Rows too large for registers always go to shared memory and are fully covered.
    #[test]
    fn large_buffers_use_shared_memory(vectors in 8193i64..=65536, iteration in 1i64..=4096) {
        let reduction = vectors * 4;
        let props = PersistentKernelProperties::builder()
            .total_reduction_numel(reduction)
            .total_iteration_numel(iteration)
            .build();
        let device = DeviceProperties::a100();
        let params = inner_persistent_heuristic(&props, &device, &config()).unwrap();
        prop_assert_eq!(params.heuristic, PersistentHeuristicKind::SharedMemory);
        prop_assert!(params.shared_mem_persistent_buffer);
        let covered = params.batches_per_block_inner_reduction
            * params.unroll_factor_inner_reduction
            * device.max_threads_per_block;
        prop_assert!(covered >= reduction);
    }

    #[test]
    fn legacy_stays_in_bounds(reduction in 1i64..=8192, iteration in 1i64..=1 << 16, half in any::<bool>()) {
        let props = PersistentKernelProperties::builder()
            .total_reduction_numel(reduction)
            .total_iteration_numel(iteration)
            .max_dtype_size(if half { 2 } else { 4 })
            .build();
        let params = legacy_heuristic(&props, &DeviceProperties::a100());
        prop_assert!(params.batches_per_block_inner_reduction >= 1);
        prop_assert!(params.unroll_factor_inner_reduction >= 1);
        let registers = params.max_register_count.unwrap_or(0);
        prop_assert!((1..=255).contains(&registers));
    }

    /// The same problem always yields the same parameters.
    #[test]
    fn heuristic_is_deterministic(vectors in 1i64..=16384, iteration in 1i64..=1 << 16) {
        let props = PersistentKernelProperties::builder()
            .total_reduction_numel(vectors * 4)
            .total_iteration_numel(iteration)
            .build();
        let device = DeviceProperties::h100();
        let first = inner_persistent_heuristic(&props, &device, &config());
        let second = inner_persistent_heuristic(&props, &device, &config());
        prop_assert_eq!(first.ok(), second.ok());
    }
}
