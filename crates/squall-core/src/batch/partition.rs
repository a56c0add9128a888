//! Splitting work items into fixed-size batches.

/// One item inside a batch, tagged with its batch-local correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry<T> {
    /// Zero-based position of the item within its batch, as a string.
    pub id: String,
    pub item: T,
}

/// An ordered group of items submitted to a remote service in one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    /// Zero-based position of the batch in partition order.
    pub id: usize,
    pub entries: Vec<BatchEntry<T>>,
}

impl<T> Batch<T> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the items in submission order.
    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|entry| &entry.item)
    }
}

/// Partition `items` into batches of at most `capacity` entries.
///
/// Order is preserved across and within batches; only the last batch may be
/// shorter than `capacity`. A capacity of zero is treated as one.
pub fn partition<T>(items: Vec<T>, capacity: usize) -> Vec<Batch<T>> {
    let capacity = capacity.max(1);
    let mut batches: Vec<Batch<T>> = Vec::with_capacity(items.len().div_ceil(capacity));

    for (index, item) in items.into_iter().enumerate() {
        let position = index % capacity;
        if position == 0 {
            batches.push(Batch {
                id: batches.len(),
                entries: Vec::with_capacity(capacity),
            });
        }
        if let Some(batch) = batches.last_mut() {
            batch.entries.push(BatchEntry {
                id: position.to_string(),
                item,
            });
        }
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_yields_no_batches() {
        let batches = partition(Vec::<u32>::new(), 10);
        assert!(batches.is_empty());
    }

    #[test]
    fn test_twenty_five_items_by_ten() {
        let items: Vec<u32> = (0..25).collect();
        let batches = partition(items, 10);

        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(
            batches.iter().map(|b| b.id).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(batches[2].entries[0].item, 20);
    }

    #[test]
    fn test_entry_ids_restart_in_each_batch() {
        let batches = partition(vec!["a", "b", "c", "d", "e"], 2);

        let ids: Vec<Vec<&str>> = batches
            .iter()
            .map(|b| b.entries.iter().map(|e| e.id.as_str()).collect())
            .collect();
        assert_eq!(ids, vec![vec!["0", "1"], vec!["0", "1"], vec!["0"]]);
    }

    #[test]
    fn test_zero_capacity_means_one_per_batch() {
        let batches = partition(vec![1, 2, 3], 0);
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() == 1));
    }

    #[test]
    fn test_partition_covers_input_in_order() {
        for len in 0..40usize {
            for capacity in 1..13usize {
                let items: Vec<usize> = (0..len).collect();
                let batches = partition(items.clone(), capacity);

                assert_eq!(batches.len(), len.div_ceil(capacity), "len={len} cap={capacity}");

                for (i, batch) in batches.iter().enumerate() {
                    assert_eq!(batch.id, i);
                    if i + 1 < batches.len() {
                        assert_eq!(batch.len(), capacity);
                    } else {
                        assert!(batch.len() <= capacity && !batch.is_empty());
                    }
                }

                let flattened: Vec<usize> =
                    batches.iter().flat_map(|b| b.items().copied()).collect();
                assert_eq!(flattened, items);
            }
        }
    }
}
