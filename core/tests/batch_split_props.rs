use dptrain::training::split_batch;
use proptest::prelude::*;

proptest! {
    #[test]
    fn shards_partition_the_batch(batch in prop::collection::vec(any::<u32>(), 0..64), n in 1usize..9) {
        let shards = split_batch(&batch, n);
        prop_assert_eq!(shards.len(), n);

        let total: usize = shards.iter().map(Vec::len).sum();
        prop_assert_eq!(total, batch.len());

        let max = shards.iter().map(Vec::len).max().unwrap_or(0);
        let min = shards.iter().map(Vec::len).min().unwrap_or(0);
        prop_assert!(max - min <= 1);

        for (i, shard) in shards.iter().enumerate() {
            for (j, item) in shard.iter().enumerate() {
                prop_assert_eq!(*item, batch[i + j * n]);
            }
        }
    }
}
