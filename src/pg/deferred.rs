//! Bounded async stack of reusable resources.
//!
//! `DeferredStack` hands out at most `max` items. Free items are reused LIFO;
//! when none is free and fewer than `max` exist, one is built by the factory;
//! otherwise the caller queues and the next `push` hands its item straight to
//! the longest waiter. A connection's single in-flight permit is the
//! `max = 1` case, the connection pool is the general one.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Error, PgResult};

pub type FactoryFuture<T> = Pin<Box<dyn Future<Output = PgResult<T>> + Send>>;

/// Builds a new item on demand.
pub type Factory<T> = Arc<dyn Fn() -> FactoryFuture<T> + Send + Sync>;

/// What a queued `pop` is woken with.
enum Wake<T> {
    /// A pushed item, handed over directly.
    Item(T),
    /// A freed slot, already reserved for this waiter; build an item in it.
    Create(Factory<T>),
    /// The stack was closed.
    Closed,
}

enum Next<T> {
    Create(Factory<T>),
    Wait(oneshot::Receiver<Wake<T>>),
}

struct State<T> {
    items: Vec<T>,
    queue: VecDeque<oneshot::Sender<Wake<T>>>,
    created: usize,
    closed: bool,
}

pub struct DeferredStack<T> {
    max: usize,
    factory: Option<Factory<T>>,
    state: Mutex<State<T>>,
}

impl<T: Send + 'static> DeferredStack<T> {
    /// An empty stack that creates up to `max` items lazily.
    pub fn new(max: usize, factory: Factory<T>) -> Self {
        Self::build(max, Vec::new(), Some(factory))
    }

    /// A stack pre-seeded with `items` and no factory. `max` is the number
    /// of items.
    pub fn with_items(items: impl IntoIterator<Item = T>) -> Self {
        let items: Vec<T> = items.into_iter().collect();
        Self::build(items.len(), items, None)
    }

    /// Pre-seeded and still allowed to grow up to `max` through `factory`.
    pub fn with_items_and_factory(
        max: usize,
        items: impl IntoIterator<Item = T>,
        factory: Factory<T>,
    ) -> Self {
        Self::build(max, items.into_iter().collect(), Some(factory))
    }

    fn build(max: usize, items: Vec<T>, factory: Option<Factory<T>>) -> Self {
        let created = items.len();
        Self {
            max: max.max(created),
            factory,
            state: Mutex::new(State {
                items,
                queue: VecDeque::new(),
                created,
                closed: false,
            }),
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Items sitting idle in the stack.
    pub fn available(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Items alive right now, idle or checked out.
    pub fn created(&self) -> usize {
        self.state.lock().created
    }

    /// Callers queued in `pop`.
    pub fn waiting(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Take an item, creating or waiting for one as needed.
    ///
    /// Fails if the stack is closed or the factory fails; a factory failure
    /// gives the slot back so a later `pop` may try again.
    pub async fn pop(&self) -> PgResult<T> {
        let next = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(closed());
            }
            if let Some(item) = state.items.pop() {
                return Ok(item);
            }
            match &self.factory {
                Some(factory) if state.created < self.max => {
                    state.created += 1;
                    Next::Create(Arc::clone(factory))
                }
                _ => {
                    let (tx, rx) = oneshot::channel();
                    state.queue.push_back(tx);
                    Next::Wait(rx)
                }
            }
        };

        match next {
            Next::Create(factory) => self.create(factory).await,
            Next::Wait(rx) => {
                let mut waiter = Waiter {
                    stack: self,
                    rx,
                    done: false,
                };
                let woken = (&mut waiter.rx).await;
                waiter.done = true;
                match woken {
                    Ok(Wake::Item(item)) => Ok(item),
                    Ok(Wake::Create(factory)) => self.create(factory).await,
                    Ok(Wake::Closed) | Err(_) => Err(closed()),
                }
            }
        }
    }

    /// Build an item in a slot already counted in `created`.
    async fn create(&self, factory: Factory<T>) -> PgResult<T> {
        let slot = SlotGuard { stack: self, armed: true };
        let item = factory().await?;
        slot.disarm();
        Ok(item)
    }

    /// Return an item. The longest waiter, if any, receives it directly.
    pub fn push(&self, item: T) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        let mut item = item;
        while let Some(tx) = state.queue.pop_front() {
            match tx.send(Wake::Item(item)) {
                Ok(()) => return,
                // waiter went away, try the next one
                Err(Wake::Item(back)) => item = back,
                Err(_) => return,
            }
        }
        state.items.push(item);
    }

    /// Forget a checked-out item that can't be reused, freeing its slot.
    ///
    /// With a factory, the slot moves to the longest waiter, which builds a
    /// replacement; a later `pop` cannot take it first.
    pub fn discard(&self) {
        let mut state = self.state.lock();
        if let Some(factory) = &self.factory {
            while let Some(tx) = state.queue.pop_front() {
                if tx.send(Wake::Create(Arc::clone(factory))).is_ok() {
                    return;
                }
            }
        }
        state.created = state.created.saturating_sub(1);
    }

    /// Refuse further pops and wake every waiter with an error.
    ///
    /// Returns the idle items so the caller can close them.
    pub fn close(&self) -> Vec<T> {
        let mut state = self.state.lock();
        state.closed = true;
        for tx in state.queue.drain(..) {
            let _ = tx.send(Wake::Closed);
        }
        let idle = std::mem::take(&mut state.items);
        state.created -= idle.len();
        idle
    }
}

fn closed() -> Error {
    Error::Pool("pool is closed".to_string())
}

/// Gives a reserved creation slot back unless disarmed, including when the
/// `pop` future is dropped mid-creation.
struct SlotGuard<'a, T: Send + 'static> {
    stack: &'a DeferredStack<T>,
    armed: bool,
}

impl<T: Send + 'static> SlotGuard<'_, T> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<T: Send + 'static> Drop for SlotGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.stack.discard();
        }
    }
}

/// A queued `pop`. If dropped before being woken, anything already handed
/// to it is passed on so no item or slot is lost.
struct Waiter<'a, T: Send + 'static> {
    stack: &'a DeferredStack<T>,
    rx: oneshot::Receiver<Wake<T>>,
    done: bool,
}

impl<T: Send + 'static> Drop for Waiter<'_, T> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.rx.close();
        match self.rx.try_recv() {
            Ok(Wake::Item(item)) => self.stack.push(item),
            Ok(Wake::Create(_)) => self.stack.discard(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    fn counting_factory(counter: Arc<AtomicUsize>) -> Factory<usize> {
        Arc::new(move || -> FactoryFuture<usize> {
            let counter = Arc::clone(&counter);
            Box::pin(async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) })
        })
    }

    #[tokio::test]
    async fn test_lazy_creation_and_lifo_reuse() {
        let counter = Arc::new(AtomicUsize::new(0));
        let stack = DeferredStack::new(3, counting_factory(Arc::clone(&counter)));

        let a = stack.pop().await.unwrap();
        let b = stack.pop().await.unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(stack.created(), 2);

        stack.push(a);
        stack.push(b);
        // last released is first reused
        assert_eq!(stack.pop().await.unwrap(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fairness_with_single_slot() {
        let counter = Arc::new(AtomicUsize::new(0));
        let stack = Arc::new(DeferredStack::new(1, counting_factory(Arc::clone(&counter))));

        let first = stack.pop().await.unwrap();

        let waiter = {
            let stack = Arc::clone(&stack);
            tokio::spawn(async move { stack.pop().await })
        };
        tokio::task::yield_now().await;
        assert!(timeout(Duration::from_millis(50), async {
            while stack.waiting() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .is_ok());
        assert!(!waiter.is_finished());

        stack.push(first);
        let second = waiter.await.unwrap().unwrap();
        // the pushed item, not a new one
        assert_eq!(second, first);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_capacity_blocks_extra_pop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let stack = DeferredStack::new(2, counting_factory(counter));

        let _a = stack.pop().await.unwrap();
        let _b = stack.pop().await.unwrap();
        assert!(timeout(Duration::from_millis(50), stack.pop()).await.is_err());
        assert_eq!(stack.created(), 2);
        // the timed-out waiter was cleaned up
        assert_eq!(stack.available(), 0);
    }

    #[tokio::test]
    async fn test_waiters_are_served_in_order() {
        let stack = Arc::new(DeferredStack::with_items([7usize]));
        let item = stack.pop().await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for id in 0..3 {
            let shared = Arc::clone(&stack);
            let tx = tx.clone();
            tokio::spawn(async move {
                let item = shared.pop().await.unwrap();
                tx.send(id).unwrap();
                shared.push(item);
            });
            // make sure each task is queued before spawning the next
            while stack.waiting() < id + 1 {
                tokio::task::yield_now().await;
            }
        }

        stack.push(item);
        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(rx.recv().await.unwrap());
        }
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_factory_failure_frees_slot() {
        let fail = Arc::new(AtomicUsize::new(1));
        let factory: Factory<u8> = {
            let fail = Arc::clone(&fail);
            Arc::new(move || -> FactoryFuture<u8> {
                let fail = Arc::clone(&fail);
                Box::pin(async move {
                    if fail.swap(0, Ordering::SeqCst) == 1 {
                        Err(Error::Connection("refused".into()))
                    } else {
                        Ok(9)
                    }
                })
            })
        };
        let stack = DeferredStack::new(1, factory);

        assert!(matches!(stack.pop().await, Err(Error::Connection(_))));
        assert_eq!(stack.created(), 0);
        assert_eq!(stack.pop().await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_discard_lets_waiter_create() {
        let counter = Arc::new(AtomicUsize::new(0));
        let stack = Arc::new(DeferredStack::new(1, counting_factory(counter)));
        let _broken = stack.pop().await.unwrap();

        let waiter = {
            let stack = Arc::clone(&stack);
            tokio::spawn(async move { stack.pop().await })
        };
        while stack.waiting() == 0 {
            tokio::task::yield_now().await;
        }
        stack.discard();
        assert_eq!(waiter.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_discarded_slot_stays_with_waiter() {
        let counter = Arc::new(AtomicUsize::new(0));
        let stack = Arc::new(DeferredStack::new(1, counting_factory(counter)));
        let _broken = stack.pop().await.unwrap();

        let waiter = {
            let shared = Arc::clone(&stack);
            tokio::spawn(async move { shared.pop().await })
        };
        while stack.waiting() == 0 {
            tokio::task::yield_now().await;
        }
        stack.discard();
        assert_eq!(stack.created(), 1);

        // a newcomer arriving before the waiter runs has to queue
        assert!(timeout(Duration::from_millis(50), stack.pop()).await.is_err());
        assert_eq!(waiter.await.unwrap().unwrap(), 1);
        assert_eq!(stack.created(), 1);
    }

    #[tokio::test]
    async fn test_discard_without_waiters_frees_slot() {
        let counter = Arc::new(AtomicUsize::new(0));
        let stack = DeferredStack::new(1, counting_factory(counter));
        let _broken = stack.pop().await.unwrap();
        stack.discard();
        assert_eq!(stack.created(), 0);
        assert_eq!(stack.pop().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_close_fails_waiters_and_returns_idle() {
        let stack = Arc::new(DeferredStack::with_items([1u8, 2u8]));
        let a = stack.pop().await.unwrap();
        let _b = stack.pop().await.unwrap();
        stack.push(a);
        let _a = stack.pop().await.unwrap();

        let waiter = {
            let stack = Arc::clone(&stack);
            tokio::spawn(async move { stack.pop().await })
        };
        while stack.waiting() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(stack.close().is_empty());
        assert!(matches!(waiter.await.unwrap(), Err(Error::Pool(_))));
        assert!(stack.pop().await.is_err());
    }
}
