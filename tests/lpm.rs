mod common {
    use std::io::Write;

    pub fn init() {
        let _ = env_logger::builder()
            .format(|buf, record| writeln!(buf, "{}", record.args()))
            .is_test(true)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use dxr_fib::{
        epoch, Fib, FibConfig, NhId, PrefixId, RouteTable, RouteUpdate,
    };

    // Small trie for tests; a full rebuild sweeps every chunk.
    fn cfg() -> FibConfig {
        FibConfig {
            trie_bits: 12,
            ..Default::default()
        }
    }

    fn pfx(net: u32, len: u8) -> PrefixId {
        PrefixId::new(net, len).unwrap()
    }

    fn oracle(table: &RouteTable, key: u32) -> NhId {
        table.best_match(key).map(|r| r.nexthop).unwrap_or(NhId(0))
    }

    #[test]
    fn nested_prefixes_and_withdrawal(
    ) -> Result<(), Box<dyn std::error::Error>> {
        crate::common::init();

        let mut fib = Fib::new(cfg())?;
        let mut table = RouteTable::new();
        let batch = vec![
            table.announce(pfx(0, 0), NhId(100)),
            table.announce(pfx(0x0a000000, 8), NhId(200)),
            table.announce(pfx(0x0a010000, 16), NhId(300)),
        ];
        fib.apply(&table, &batch)?;

        let reader = fib.reader();
        let guard = &epoch::pin();
        assert_eq!(reader.lookup(0x0a010203, guard), NhId(300));
        assert_eq!(reader.lookup(0x0a020304, guard), NhId(200));
        assert_eq!(reader.lookup(0xc0a80001, guard), NhId(100));

        let up = table.withdraw(pfx(0x0a010000, 16))?;
        fib.apply(&table, &[up])?;
        let guard = &epoch::pin();
        assert_eq!(reader.lookup(0x0a010203, guard), NhId(200));
        assert_eq!(reader.lookup(0xc0a80001, guard), NhId(100));

        let up = table.withdraw(pfx(0, 0))?;
        fib.apply(&table, &[up])?;
        let guard = &epoch::pin();
        assert_eq!(reader.lookup(0xc0a80001, guard), NhId(0));
        Ok(())
    }

    #[test]
    fn random_table_matches_the_linear_oracle(
    ) -> Result<(), Box<dyn std::error::Error>> {
        crate::common::init();

        let mut rng = StdRng::seed_from_u64(2026);
        let mut fib = Fib::new(cfg())?;
        let mut table = RouteTable::new();

        let random_batch = |table: &mut RouteTable,
                                rng: &mut StdRng,
                                n: usize| {
            let mut batch = Vec::new();
            for _ in 0..n {
                let len = rng.random_range(4..=28u8);
                let net = rng.random::<u32>() & (u32::MAX << (32 - len));
                let nh = NhId(1 + rng.random_range(0..64u32));
                batch.push(table.announce(pfx(net, len), nh));
            }
            batch
        };

        let batch = random_batch(&mut table, &mut rng, 200);
        fib.apply(&table, &batch)?;
        let batch = random_batch(&mut table, &mut rng, 100);
        fib.apply(&table, &batch)?;

        let guard = &epoch::pin();
        for _ in 0..10_000 {
            let key = rng.random::<u32>();
            assert_eq!(
                fib.lookup(key, guard),
                oracle(&table, key),
                "divergence at {:08x}",
                key
            );
        }
        Ok(())
    }

    #[test]
    fn churn_keeps_patched_lookups_consistent(
    ) -> Result<(), Box<dyn std::error::Error>> {
        crate::common::init();

        let mut rng = StdRng::seed_from_u64(7);
        let mut fib = Fib::new(cfg())?;
        let mut table = RouteTable::new();

        // a stable backdrop plus a region the churn keeps rewriting
        let mut batch = vec![table.announce(pfx(0, 0), NhId(1))];
        for i in 0..64u32 {
            batch.push(
                table.announce(pfx(0x0a000000 | (i << 16), 16), NhId(2 + i)),
            );
        }
        fib.apply(&table, &batch)?;

        for round in 0..20u32 {
            let mut batch: Vec<RouteUpdate> = Vec::new();
            for _ in 0..8 {
                let i = rng.random_range(0..64u32);
                let p = pfx(0x0a000000 | (i << 16) | 0x8000, 17);
                if rng.random::<bool>() {
                    batch.push(table.announce(p, NhId(100 + round)));
                } else if let Ok(up) = table.withdraw(p) {
                    batch.push(up);
                }
            }
            fib.apply(&table, &batch)?;

            let guard = &epoch::pin();
            for _ in 0..500 {
                let key = 0x0a000000 | rng.random::<u32>() & 0x00ff_ffff;
                assert_eq!(fib.lookup(key, guard), oracle(&table, key));
            }
        }
        assert!(fib.stats().patches >= 1);
        Ok(())
    }

    #[test]
    fn incremental_and_scratch_builds_agree(
    ) -> Result<(), Box<dyn std::error::Error>> {
        crate::common::init();

        let mut rng = StdRng::seed_from_u64(99);
        let mut incremental = Fib::new(cfg())?;
        let mut table = RouteTable::new();

        for _ in 0..10 {
            let mut batch = Vec::new();
            for _ in 0..20 {
                let len = rng.random_range(8..=24u8);
                let net = rng.random::<u32>() & (u32::MAX << (32 - len));
                batch.push(table.announce(pfx(net, len), NhId(1)));
            }
            incremental.apply(&table, &batch)?;
        }

        // same table, one build from scratch
        let mut scratch = Fib::new(cfg())?;
        scratch.apply(&table, &[])?;

        let guard = &epoch::pin();
        for _ in 0..10_000 {
            let key = rng.random::<u32>();
            assert_eq!(
                incremental.lookup(key, guard),
                scratch.lookup(key, guard)
            );
        }
        Ok(())
    }

    // Each full rebuild re-scores the previous split point and its
    // neighbors. On a nearly uniform table a narrower first level is
    // always cheaper, so consecutive rebuilds walk it down.
    #[test]
    fn full_rebuilds_walk_the_split_toward_cheaper(
    ) -> Result<(), Box<dyn std::error::Error>> {
        crate::common::init();

        let mut fib = Fib::new(cfg())?;
        let mut table = RouteTable::new();

        // each batch more than doubles the route count
        let mut next = 1u32;
        let mut d_sizes = Vec::new();
        for n in [1usize, 2, 4] {
            let mut batch = Vec::new();
            for _ in 0..n {
                batch.push(
                    table.announce(pfx(next << 20, 12), NhId(next)),
                );
                next += 1;
            }
            fib.apply(&table, &batch)?;
            d_sizes.push(fib.stats().d_entries);
        }
        assert_eq!(fib.stats().rebuilds, 3);
        assert!(d_sizes[1] < d_sizes[0]);
        assert!(d_sizes[2] < d_sizes[1]);

        let guard = &epoch::pin();
        assert_eq!(fib.lookup(0x0010_0000, guard), NhId(1));
        assert_eq!(fib.lookup(0x0060_ffff, guard), NhId(6));
        assert_eq!(fib.lookup(0x0080_0000, guard), NhId(0));
        Ok(())
    }

    // 4096 /24s with cycling next-hops force one chunk past the in-band
    // count field into the explicit-count form.
    #[test]
    fn oversized_chunk_still_resolves(
    ) -> Result<(), Box<dyn std::error::Error>> {
        crate::common::init();

        let mut fib = Fib::new(cfg())?;
        let mut table = RouteTable::new();
        let mut batch = Vec::new();
        for i in 0..4096u32 {
            batch.push(
                table.announce(pfx(i << 8, 24), NhId(1 + i % 300)),
            );
        }
        fib.apply(&table, &batch)?;

        // the count word comes on top of one entry per /24
        assert!(fib.stats().range_words >= 4097);

        let guard = &epoch::pin();
        assert_eq!(fib.lookup(0x0000_0000, guard), NhId(1));
        assert_eq!(fib.lookup(0x0000_01ff, guard), NhId(2));
        assert_eq!(fib.lookup(0x000f_ffff, guard), NhId(1 + 4095 % 300));
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..2_000 {
            let key = rng.random::<u32>() & 0x000f_ffff;
            assert_eq!(fib.lookup(key, guard), NhId(1 + (key >> 8) % 300));
        }
        // outside the tiled chunk nothing resolves
        assert_eq!(fib.lookup(0x0010_0000, guard), NhId(0));
        Ok(())
    }
}
