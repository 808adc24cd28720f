//! Property-based laws of the bitvector and the column engine.

use proptest::prelude::*;
use std::sync::Arc;
use striadb_core::{
    Bitvector, ColumnSchema, ColumnType, ContinuousRange, FileManager, Partition, RangeOp,
    StoreConfig, ValuesVec,
};

fn bitvector_of(bits: &[bool]) -> Bitvector {
    let mut bv = Bitvector::new();
    for &b in bits {
        bv.push(b);
    }
    bv
}

fn bits_of(bv: &Bitvector) -> Vec<bool> {
    let mut out = vec![false; bv.size() as usize];
    for pos in bv.set_positions() {
        out[pos as usize] = true;
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// adjust_size(k, n) pads with ones to k, zeros to n, and truncates.
    #[test]
    fn prop_adjust_size(
        bits in proptest::collection::vec(any::<bool>(), 0..200),
        active in 0u64..250,
        total in 0u64..250,
    ) {
        let mut bv = bitvector_of(&bits);
        bv.adjust_size(active, total);
        prop_assert_eq!(bv.size(), total);

        let out = bits_of(&bv);
        for (i, &bit) in out.iter().enumerate() {
            let i = i as u64;
            let expected = if (i as usize) < bits.len() && i < total {
                // Original bits survive up to the truncation point.
                bits[i as usize]
            } else {
                // Padding: ones up to `active`, zeros beyond.
                i < active
            };
            prop_assert_eq!(bit, expected, "bit {}", i);
        }
    }

    /// Logical operations agree with the boolean model.
    #[test]
    fn prop_logical_ops_match_model(
        a in proptest::collection::vec(any::<bool>(), 0..300),
        b in proptest::collection::vec(any::<bool>(), 0..300),
    ) {
        let n = a.len().max(b.len());
        let pad = |v: &[bool]| {
            let mut v = v.to_vec();
            v.resize(n, false);
            v
        };
        let (ma, mb) = (pad(&a), pad(&b));
        let (va, vb) = (bitvector_of(&a), bitvector_of(&b));

        let and: Vec<bool> = ma.iter().zip(&mb).map(|(&x, &y)| x && y).collect();
        let or: Vec<bool> = ma.iter().zip(&mb).map(|(&x, &y)| x || y).collect();
        let minus: Vec<bool> = ma.iter().zip(&mb).map(|(&x, &y)| x && !y).collect();

        prop_assert_eq!(bits_of(&va.and(&vb)), and);
        prop_assert_eq!(bits_of(&va.or(&vb)), or);
        prop_assert_eq!(bits_of(&va.minus(&vb)), minus);
    }

    /// cnt() counts exactly the set bits; index sets report each of them
    /// once, in strictly increasing order.
    #[test]
    fn prop_count_and_iteration(bits in proptest::collection::vec(any::<bool>(), 0..500)) {
        let bv = bitvector_of(&bits);
        let expected: Vec<u64> = bits
            .iter()
            .enumerate()
            .filter(|(_, &b)| b)
            .map(|(i, _)| i as u64)
            .collect();
        prop_assert_eq!(bv.cnt(), expected.len() as u64);
        let seen: Vec<u64> = bv.set_positions().collect();
        prop_assert_eq!(seen, expected);
    }

    /// subset() projects bits through the selector.
    #[test]
    fn prop_subset(bits in proptest::collection::vec(any::<(bool, bool)>(), 0..300)) {
        let values: Vec<bool> = bits.iter().map(|&(v, _)| v).collect();
        let keep: Vec<bool> = bits.iter().map(|&(_, k)| k).collect();
        let projected = bitvector_of(&values).subset(&bitvector_of(&keep));
        let expected: Vec<bool> = values
            .iter()
            .zip(&keep)
            .filter(|(_, &k)| k)
            .map(|(&v, _)| v)
            .collect();
        prop_assert_eq!(bits_of(&projected), expected);
    }

    /// Serialization round-trips bit for bit.
    #[test]
    fn prop_serialization_roundtrip(bits in proptest::collection::vec(any::<bool>(), 0..400)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.msk");
        let bv = bitvector_of(&bits);
        bv.write(&path).unwrap();
        let back = Bitvector::read(&path).unwrap();
        prop_assert_eq!(back, bv);
    }
}

proptest! {
    // Column-level properties spin up a partition per case; keep the case
    // count modest.
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// select(A ∨ B) over disjoint masks is the concatenation of the two
    /// selections in row order.
    #[test]
    fn prop_disjoint_selects_concatenate(
        values in proptest::collection::vec(any::<i32>(), 1..120),
        picks in proptest::collection::vec(0u8..3, 1..120),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::default();
        let files = Arc::new(FileManager::new(&config.file_manager));
        let mut part = Partition::create(dir.path(), "t", Arc::clone(&files), &config).unwrap();
        part.add_column(ColumnSchema::new("v", ColumnType::I32)).unwrap();
        let n = values.len() as u64;
        part.append_values(&[("v", ValuesVec::I32(values.clone()), None)], n).unwrap();
        let col = part.column("v").unwrap();

        // picks: 0 -> neither, 1 -> mask A, 2 -> mask B; disjoint by
        // construction.
        let rows = values.len().min(picks.len());
        let a = Bitvector::from_sorted_positions(
            (0..rows).filter(|&i| picks[i] == 1).map(|i| i as u64),
            n,
        );
        let b = Bitvector::from_sorted_positions(
            (0..rows).filter(|&i| picks[i] == 2).map(|i| i as u64),
            n,
        );

        let merged: Vec<i32> = col.select_values_as(&a.or(&b)).unwrap();
        let expected: Vec<i32> = (0..rows)
            .filter(|&i| picks[i] == 1 || picks[i] == 2)
            .map(|i| values[i])
            .collect();
        prop_assert_eq!(merged, expected);
    }

    /// evaluate(P1 ∧ P2) == evaluate(P1) ∧ evaluate(P2) over one column.
    #[test]
    fn prop_conjunction_of_ranges(
        values in proptest::collection::vec(0u32..1000, 1..200),
        lo in 0u32..1000,
        width in 0u32..500,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::default();
        let files = Arc::new(FileManager::new(&config.file_manager));
        let mut part = Partition::create(dir.path(), "t", Arc::clone(&files), &config).unwrap();
        part.add_column(ColumnSchema::new("v", ColumnType::U32)).unwrap();
        let n = values.len() as u64;
        part.append_values(&[("v", ValuesVec::U32(values), None)], n).unwrap();
        let col = part.column("v").unwrap();
        let mask = Bitvector::filled(true, n);

        let hi = f64::from(lo) + f64::from(width);
        let p1 = ContinuousRange::at_least(f64::from(lo));
        let p2 = ContinuousRange::at_most(hi);
        let both = ContinuousRange::new(f64::from(lo), RangeOp::Le, RangeOp::Le, hi);

        let h1 = col.evaluate_continuous(&p1, &mask).unwrap();
        let h2 = col.evaluate_continuous(&p2, &mask).unwrap();
        let hb = col.evaluate_continuous(&both, &mask).unwrap();
        let lhs: Vec<u64> = hb.set_positions().collect();
        let rhs: Vec<u64> = h1.and(&h2).set_positions().collect();
        prop_assert_eq!(lhs, rhs);
    }

    /// A persisted mask reads back identically (absent file ≡ all ones).
    #[test]
    fn prop_mask_roundtrip(valid in proptest::collection::vec(any::<bool>(), 1..150)) {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::default();
        let files = Arc::new(FileManager::new(&config.file_manager));
        let mut part = Partition::create(dir.path(), "t", Arc::clone(&files), &config).unwrap();
        part.add_column(ColumnSchema::new("v", ColumnType::U8)).unwrap();
        let n = valid.len() as u64;
        part.append_values(
            &[("v", ValuesVec::U8(vec![1; valid.len()]), None)],
            n,
        ).unwrap();
        let col = part.column("v").unwrap();

        let mask = bitvector_of(&valid);
        col.set_null_mask(&mask).unwrap();
        prop_assert_eq!(bits_of(&col.null_mask().unwrap()), valid.clone());

        // A fresh partition must reconcile the same mask from disk.
        let reopened = Partition::open(dir.path(), Arc::clone(&files), &config).unwrap();
        let col = reopened.column("v").unwrap();
        prop_assert_eq!(bits_of(&col.null_mask().unwrap()), valid);
    }
}
