//! Observable state cell updated through reducers.

use tokio::sync::watch;

/// Shared state value with change subscriptions.
///
/// The only way to change the value is [`Store::update`], which folds new data
/// in through a pure reducer and notifies subscribers when the result differs.
#[derive(Debug)]
pub struct Store<S> {
	tx: watch::Sender<S>,
}

impl<S: Clone + PartialEq> Store<S> {
	pub fn new(initial: S) -> Self {
		let (tx, _rx) = watch::channel(initial);
		Self { tx }
	}

	/// Current value.
	pub fn get(&self) -> S {
		self.tx.borrow().clone()
	}

	/// Replaces the value with `reducer(&current)`. Returns `true` if it changed.
	pub fn update(&self, reducer: impl FnOnce(&S) -> S) -> bool {
		self.tx.send_if_modified(|current| {
			let next = reducer(current);
			if next == *current {
				return false;
			}
			*current = next;
			true
		})
	}

	/// Receiver notified on every change.
	pub fn subscribe(&self) -> watch::Receiver<S> {
		self.tx.subscribe()
	}
}

impl<S: Clone + PartialEq + Default> Default for Store<S> {
	fn default() -> Self {
		Self::new(S::default())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn update_notifies_only_on_change() {
		let store = Store::new(vec![1]);
		let mut rx = store.subscribe();

		assert!(!store.update(|current| current.clone()));
		assert!(!rx.has_changed().unwrap());

		assert!(store.update(|current| {
			let mut next = current.clone();
			next.push(2);
			next
		}));
		rx.changed().await.unwrap();
		assert_eq!(*rx.borrow_and_update(), vec![1, 2]);
		assert_eq!(store.get(), vec![1, 2]);
	}
}
