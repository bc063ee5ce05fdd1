//! Publish/Subscribe Plumbing
//!
//! Metrics and governed-parameter streams are delivered through a small
//! single-threaded subscription kit. A publisher appends to an ordered
//! replayable log; subscriptions read the log, and registered observers
//! are invoked synchronously on every publish.

use std::cell::RefCell;
use std::rc::Rc;

type Observer<T> = Rc<dyn Fn(&T)>;

struct Channel<T> {
    log: Vec<T>,
    observers: Vec<Observer<T>>,
}

/// Writable half of a subscription channel.
pub struct Publisher<T> {
    channel: Rc<RefCell<Channel<T>>>,
}

/// Readable half of a subscription channel.
pub struct Subscription<T> {
    channel: Rc<RefCell<Channel<T>>>,
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            channel: Rc::clone(&self.channel),
        }
    }
}

impl<T> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        Self {
            channel: Rc::clone(&self.channel),
        }
    }
}

impl<T: Clone> Publisher<T> {
    /// Append a value to the log and notify every observer.
    ///
    /// Observers are cloned out of the channel before being invoked so
    /// that an observer may itself publish or subscribe without hitting
    /// a re-entrant borrow.
    pub fn publish(&self, value: T) {
        let observers: Vec<Observer<T>> = {
            let mut channel = self.channel.borrow_mut();
            channel.log.push(value.clone());
            channel.observers.clone()
        };
        for observer in observers {
            observer(&value);
        }
    }
}

impl<T: Clone> Subscription<T> {
    /// Register a synchronous observer called on every future publish.
    pub fn observe(&self, observer: impl Fn(&T) + 'static) {
        self.channel.borrow_mut().observers.push(Rc::new(observer));
    }

    /// The most recently published value, if any.
    pub fn latest(&self) -> Option<T> {
        self.channel.borrow().log.last().cloned()
    }

    /// Full ordered history of published values.
    pub fn history(&self) -> Vec<T> {
        self.channel.borrow().log.clone()
    }

    pub fn len(&self) -> usize {
        self.channel.borrow().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Paired publisher and subscription over a fresh channel.
pub fn subscription_kit<T: Clone>() -> (Publisher<T>, Subscription<T>) {
    let channel = Rc::new(RefCell::new(Channel {
        log: Vec::new(),
        observers: Vec::new(),
    }));
    (
        Publisher {
            channel: Rc::clone(&channel),
        },
        Subscription { channel },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_appends_in_order() {
        let (publisher, subscription) = subscription_kit::<u32>();
        publisher.publish(1);
        publisher.publish(2);
        publisher.publish(3);
        assert_eq!(subscription.history(), vec![1, 2, 3]);
        assert_eq!(subscription.latest(), Some(3));
    }

    #[test]
    fn test_observer_sees_every_publish() {
        let (publisher, subscription) = subscription_kit::<u32>();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        subscription.observe(move |v| sink.borrow_mut().push(*v));
        publisher.publish(7);
        publisher.publish(9);
        assert_eq!(*seen.borrow(), vec![7, 9]);
    }

    #[test]
    fn test_observer_may_publish_reentrantly() {
        let (publisher, subscription) = subscription_kit::<u32>();
        let echo = publisher.clone();
        subscription.observe(move |v| {
            if *v < 10 {
                echo.publish(v + 10);
            }
        });
        publisher.publish(1);
        assert_eq!(subscription.history(), vec![1, 11]);
    }
}
