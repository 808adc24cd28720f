use super::*;

fn from_bits(bits: &[u8]) -> Bitvector {
    let mut bv = Bitvector::new();
    for &b in bits {
        bv.push(b != 0);
    }
    bv
}

fn to_bits(bv: &Bitvector) -> Vec<u8> {
    let mut out = vec![0u8; bv.size() as usize];
    for set in bv.index_sets() {
        match set {
            IndexSet::Range { begin, end } => {
                for i in begin..end {
                    out[i as usize] = 1;
                }
            }
            IndexSet::Literal(indices) => {
                for i in indices {
                    out[i as usize] = 1;
                }
            }
        }
    }
    out
}

#[test]
fn test_empty() {
    let bv = Bitvector::new();
    assert_eq!(bv.size(), 0);
    assert_eq!(bv.cnt(), 0);
    assert!(bv.index_sets().next().is_none());
}

#[test]
fn test_push_and_count() {
    let bv = from_bits(&[1, 0, 1, 1, 0, 0, 1]);
    assert_eq!(bv.size(), 7);
    assert_eq!(bv.cnt(), 4);
    assert_eq!(to_bits(&bv), vec![1, 0, 1, 1, 0, 0, 1]);
}

#[test]
fn test_fill_compression() {
    let mut bv = Bitvector::new();
    bv.append_fill(true, 1000);
    bv.append_fill(false, 500);
    bv.append_fill(true, 31);
    assert_eq!(bv.size(), 1531);
    assert_eq!(bv.cnt(), 1031);
    // Long fills must not cost one word per group.
    assert!(bv.bytes() < 10 * 4);
}

#[test]
fn test_fill_runs_merge() {
    let mut bv = Bitvector::new();
    bv.append_fill(true, 62);
    bv.append_fill(true, 62);
    assert_eq!(bv.size(), 124);
    let sets: Vec<_> = bv.index_sets().collect();
    assert_eq!(sets, vec![IndexSet::Range { begin: 0, end: 124 }]);
}

#[test]
fn test_set_resets_content() {
    let mut bv = from_bits(&[1, 0, 1]);
    bv.set(true, 10);
    assert_eq!(bv.size(), 10);
    assert_eq!(bv.cnt(), 10);
}

#[test]
fn test_adjust_size_pads_ones_then_zeros() {
    let mut bv = from_bits(&[1, 0]);
    bv.adjust_size(4, 7);
    assert_eq!(to_bits(&bv), vec![1, 0, 1, 1, 0, 0, 0]);
    assert_eq!(bv.size(), 7);
}

#[test]
fn test_adjust_size_truncates() {
    let mut bv = Bitvector::filled(true, 100);
    bv.adjust_size(0, 40);
    assert_eq!(bv.size(), 40);
    assert_eq!(bv.cnt(), 40);
}

#[test]
fn test_logical_ops() {
    let a = from_bits(&[1, 1, 0, 0, 1, 0, 1]);
    let b = from_bits(&[1, 0, 1, 0, 1, 1, 0]);
    assert_eq!(to_bits(&a.and(&b)), vec![1, 0, 0, 0, 1, 0, 0]);
    assert_eq!(to_bits(&a.or(&b)), vec![1, 1, 1, 0, 1, 1, 1]);
    assert_eq!(to_bits(&a.minus(&b)), vec![0, 1, 0, 0, 0, 0, 1]);
}

#[test]
fn test_logical_ops_across_group_boundaries() {
    let mut a = Bitvector::new();
    a.append_fill(true, 40);
    a.append_fill(false, 40);
    let mut b = Bitvector::new();
    b.append_fill(false, 20);
    b.append_fill(true, 60);
    let c = a.and(&b);
    assert_eq!(c.size(), 80);
    assert_eq!(c.cnt(), 20);
    assert_eq!(
        c.index_sets().collect::<Vec<_>>(),
        vec![IndexSet::Range { begin: 20, end: 40 }]
    );
}

#[test]
fn test_zero_extension_of_shorter_operand() {
    let a = Bitvector::filled(true, 100);
    let b = Bitvector::filled(true, 60);
    let c = a.and(&b);
    assert_eq!(c.size(), 100);
    assert_eq!(c.cnt(), 60);
}

#[test]
fn test_minus_assign() {
    let mut a = Bitvector::filled(true, 50);
    let b = Bitvector::from_sorted_positions([10, 20, 30], 50);
    a.minus_assign(&b);
    assert_eq!(a.cnt(), 47);
    assert!(!a.get(10));
    assert!(a.get(11));
}

#[test]
fn test_append_bitvectors() {
    let mut a = from_bits(&[1, 1]);
    let b = from_bits(&[1, 0, 1]);
    a.append(&b);
    assert_eq!(to_bits(&a), vec![1, 1, 1, 0, 1]);
    assert_eq!(a.cnt(), 4);
}

#[test]
fn test_append_group_aligned() {
    let mut a = Bitvector::filled(true, 62);
    let b = Bitvector::filled(false, 31);
    a.append(&b);
    assert_eq!(a.size(), 93);
    assert_eq!(a.cnt(), 62);
}

#[test]
fn test_index_sets_literal_and_range() {
    let bv = Bitvector::from_sorted_positions([0, 5, 7], 31);
    let sets: Vec<_> = bv.index_sets().collect();
    assert_eq!(sets, vec![IndexSet::Literal(vec![0, 5, 7])]);

    let mut long = Bitvector::new();
    long.append_fill(false, 100);
    long.append_fill(true, 200);
    let sets: Vec<_> = long.index_sets().collect();
    assert_eq!(
        sets,
        vec![IndexSet::Range {
            begin: 100,
            end: 300
        }]
    );
}

#[test]
fn test_index_sets_strictly_increasing() {
    let bits: Vec<u8> = (0..300).map(|i| u8::from(i % 7 == 0 || i > 250)).collect();
    let bv = from_bits(&bits);
    let mut last = None;
    for set in bv.index_sets() {
        let positions: Vec<u64> = match set {
            IndexSet::Range { begin, end } => (begin..end).collect(),
            IndexSet::Literal(v) => v,
        };
        for p in positions {
            assert!(last.map_or(true, |l| p > l), "positions must increase");
            last = Some(p);
        }
    }
}

#[test]
fn test_subset() {
    let values = from_bits(&[1, 0, 1, 1, 0, 1]);
    let keep = from_bits(&[1, 1, 0, 1, 1, 1]);
    let projected = values.subset(&keep);
    assert_eq!(to_bits(&projected), vec![1, 0, 1, 0, 1]);
}

#[test]
fn test_swap() {
    let mut a = Bitvector::filled(true, 5);
    let mut b = Bitvector::filled(false, 3);
    a.swap(&mut b);
    assert_eq!(a.size(), 3);
    assert_eq!(b.cnt(), 5);
}

#[test]
fn test_read_write_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("m.msk");

    let mut bv = Bitvector::new();
    bv.append_fill(true, 100);
    bv.append_fill(false, 50);
    bv.push(true);
    bv.push(false);
    bv.push(true);

    bv.write(&path).unwrap();
    let back = Bitvector::read(&path).unwrap();
    assert_eq!(back, bv);
    assert_eq!(back.size(), 153);
    assert_eq!(back.cnt(), 102);
}

#[test]
fn test_read_rejects_truncated_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.msk");
    std::fs::write(&path, [9u8, 0, 0, 0, 1, 2]).unwrap();
    assert!(Bitvector::read(&path).is_err());
}

#[test]
fn test_from_sorted_positions() {
    let bv = Bitvector::from_sorted_positions([3, 64, 65, 200], 256);
    assert_eq!(bv.size(), 256);
    assert_eq!(bv.cnt(), 4);
    assert!(bv.get(3));
    assert!(bv.get(64));
    assert!(bv.get(65));
    assert!(bv.get(200));
    assert!(!bv.get(199));
}

#[test]
fn test_truncate_mid_fill() {
    let mut bv = Bitvector::new();
    bv.append_fill(false, 10);
    bv.append_fill(true, 100);
    bv.truncate(50);
    assert_eq!(bv.size(), 50);
    assert_eq!(bv.cnt(), 40);
}
