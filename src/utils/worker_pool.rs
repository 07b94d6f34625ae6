// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use crossbeam::channel::{bounded, Receiver, Sender};
use crossbeam::thread::scope;

/// Run a preprocessor, a set of workers and a postprocessor as a scoped
/// thread pool connected by bounded channels. The postprocessor receives
/// results in the order given by their `Orderable` index, regardless of which
/// worker finished first.
pub(crate) fn worker_pool<Pre, W, WS, Post, U, T>(
    preprocessor: Pre,
    workers: WS,
    postprocessor: Post,
    in_capacity: usize,
    out_capacity: usize,
) -> Result<()>
where
    Pre: FnOnce(Sender<U>) -> Result<()> + Send,
    WS: Iterator<Item = W>,
    W: FnOnce(Receiver<U>, Sender<T>) -> Result<()> + Send,
    Post: FnOnce(Receiver<T>) -> Result<()> + Send,
    U: Send,
    T: Send + Orderable,
{
    scope(|scope| -> Result<()> {
        let (in_sender, in_receiver) = bounded(in_capacity);
        let (out_sender, out_receiver) = bounded(out_capacity);

        let worker_handles: Vec<_> = workers
            .map(|worker| {
                let receiver = in_receiver.clone();
                let sender = out_sender.clone();
                scope.spawn(move |_| worker(receiver, sender))
            })
            .collect();
        // Drop our copies so that channels disconnect once all senders are
        // done.
        drop(in_receiver);
        drop(out_sender);

        let postprocessor_handle = scope.spawn(move |_| postprocessor(out_receiver));

        preprocessor(in_sender)?;

        for handle in worker_handles {
            handle
                .join()
                .map_err(|_| anyhow!("bug: worker thread panicked"))??;
        }
        postprocessor_handle
            .join()
            .map_err(|_| anyhow!("bug: postprocessor thread panicked"))??;

        Ok(())
    })
    .map_err(|_| anyhow!("bug: worker pool panicked"))?
}

pub(crate) trait Orderable {
    fn index(&self) -> usize;
}

/// Buffer that releases items in index order, holding back items whose
/// predecessors have not arrived yet.
pub(crate) struct OrderedContainer<T> {
    inner: BTreeMap<usize, T>,
    next: usize,
}

impl<T> Default for OrderedContainer<T> {
    fn default() -> Self {
        OrderedContainer {
            inner: BTreeMap::new(),
            next: 0,
        }
    }
}

impl<T> OrderedContainer<T>
where
    T: Orderable,
{
    pub(crate) fn insert(&mut self, item: T) {
        self.inner.insert(item.index(), item);
    }

    /// Remove and return the continuous prefix starting at the next expected
    /// index.
    pub(crate) fn remove_continuous_prefix(&mut self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.inner.remove(&self.next) {
            items.push(item);
            self.next += 1;
        }
        items
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Item(usize);

    impl Orderable for Item {
        fn index(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn test_ordered_container() {
        let mut container = OrderedContainer::default();
        container.insert(Item(1));
        assert!(container.remove_continuous_prefix().is_empty());
        container.insert(Item(0));
        let released = container.remove_continuous_prefix();
        assert_eq!(
            released.iter().map(|item| item.0).collect::<Vec<_>>(),
            vec![0, 1]
        );
        container.insert(Item(2));
        assert_eq!(container.remove_continuous_prefix().len(), 1);
        assert!(container.is_empty());
    }

    #[test]
    fn test_worker_pool_orders_output() {
        let processed = std::sync::Mutex::new(Vec::new());
        worker_pool(
            |sender| {
                for i in 0..32 {
                    sender.send(i).unwrap();
                }
                Ok(())
            },
            (0..4).map(|_| {
                |receiver: crossbeam::channel::Receiver<usize>,
                 sender: crossbeam::channel::Sender<Item>| {
                    for i in receiver {
                        sender.send(Item(i)).unwrap();
                    }
                    Ok(())
                }
            }),
            |receiver| {
                let mut container = OrderedContainer::default();
                for item in receiver {
                    container.insert(item);
                    for released in container.remove_continuous_prefix() {
                        processed.lock().unwrap().push(released.0);
                    }
                }
                assert!(container.is_empty());
                Ok(())
            },
            8,
            8,
        )
        .unwrap();
        assert_eq!(
            processed.into_inner().unwrap(),
            (0..32).collect::<Vec<_>>()
        );
    }
}
