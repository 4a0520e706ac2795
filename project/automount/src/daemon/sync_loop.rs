use std::{
    any::{Any, TypeId},
    collections::HashMap,
    marker::PhantomData,
    pin::Pin,
    sync::Arc,
};

use futures::{FutureExt, future::select_all};
use tracing::error;

use crate::daemon::triggers::{PeriodicTrigger, SettingsWatcher};
use crate::orchestrator::MountOrchestrator;

/// State shared by the event handlers of the daemon.
pub struct State {
    pub orchestrator: MountOrchestrator,
    pub periodic: PeriodicTrigger,
    pub watcher: SettingsWatcher,
}

impl State {
    pub fn new(orchestrator: MountOrchestrator, periodic: PeriodicTrigger, watcher: SettingsWatcher) -> Self {
        State {
            orchestrator,
            periodic,
            watcher,
        }
    }
}

type Handler = Arc<
    dyn Fn(Arc<State>, Box<dyn Any + Send>) -> Pin<Box<dyn Future<Output = ()> + Send>>
        + Send
        + Sync,
>;
/// A function generating the future an event is waited on with.
type Listener =
    Box<dyn Fn(Arc<State>) -> Pin<Box<dyn Future<Output = Box<dyn Any + Send>> + Send>> + Send>;
/// Generated future of an event, listening in the sync loop.
type ListeningFuture = Pin<Box<dyn Future<Output = (TypeId, Box<dyn Any + Send>)> + Send>>;

/// The daemon's main loop.
///
/// Every registered event is listened on continuously: once its future
/// completes, the handler is spawned and a fresh future for the same event is
/// awaited again. Handlers of different events, or of the same event fired
/// twice, may run concurrently.
///
/// # Example
/// ```ignore
/// let sync_loop = SyncLoop::new(state).register_event(handler);
/// sync_loop.run().await;
/// ```
pub struct SyncLoop {
    state: Arc<State>,
    event_handlers: HashMap<TypeId, Handler>,
    event_listeners: HashMap<TypeId, Listener>,
    event_listen_list: Vec<ListeningFuture>,
}

pub trait Event<D> {
    fn listen(state: Arc<State>) -> Pin<Box<dyn Future<Output = D> + Send>>;
}

impl SyncLoop {
    pub fn new(state: Arc<State>) -> Self {
        SyncLoop {
            state,
            event_handlers: HashMap::new(),
            event_listeners: HashMap::new(),
            event_listen_list: Vec::new(),
        }
    }

    /// Register an event handler.
    ///
    /// The `handler` has the signature
    /// `async fn handler(state: Arc<State>, data: Box<D>, _: WithEvent<SomeEvent>)`,
    /// where `SomeEvent: Event<D>` and `WithEvent` marks which event it handles.
    pub fn register_event<T, D, F, O>(mut self, handler: F) -> Self
    where
        T: Event<D> + 'static,
        D: Send + 'static,
        O: Future<Output = ()> + Send,
        F: (Fn(Arc<State>, Box<D>, WithEvent<T>) -> O) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let handler: Handler = Arc::new(move |state, data: Box<dyn Any + Send>| {
            let handle = handler.clone();
            async move {
                match data.downcast::<D>() {
                    Ok(data) => {
                        handle(
                            state,
                            data,
                            WithEvent {
                                _marker: PhantomData,
                            },
                        )
                        .await
                    }
                    Err(_) => error!("Event data of unexpected type, dropped"),
                }
            }
            .boxed()
        });
        self.event_handlers.insert(TypeId::of::<T>(), handler);
        let listener: Listener = Box::new(move |state| {
            async move { Box::new(T::listen(state).await) as Box<dyn Any + Send> }.boxed()
        });
        self.event_listeners.insert(TypeId::of::<T>(), listener);
        self
    }

    fn listen_on(&self, id: TypeId) -> Option<ListeningFuture> {
        let listener = self.event_listeners.get(&id)?;
        let fut = listener(self.state.clone());
        Some(
            async move {
                let data = fut.await;
                (id, data)
            }
            .boxed(),
        )
    }

    /// Get a future from each event.
    fn gen_event_list(&mut self) {
        let ids: Vec<TypeId> = self.event_listeners.keys().copied().collect();
        self.event_listen_list = ids.into_iter().filter_map(|id| self.listen_on(id)).collect();
    }

    /// Run the loop. Returns only if no event is registered.
    pub async fn run(mut self) {
        self.gen_event_list();

        while !self.event_listen_list.is_empty() {
            let ((id, data), _, remain) = select_all(self.event_listen_list).await;
            self.event_listen_list = remain;

            if let Some(handler) = self.event_handlers.get(&id).cloned() {
                let state = self.state.clone();
                tokio::spawn(async move { handler(state, data).await });
            }
            if let Some(fut) = self.listen_on(id) {
                self.event_listen_list.push(fut);
            }
        }
    }
}

pub struct WithEvent<T> {
    _marker: PhantomData<T>,
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::bookmarks::FileBookmarkSource;
    use crate::config::FileSettings;
    use crate::provider::GioMountProvider;

    static TICKS: AtomicUsize = AtomicUsize::new(0);

    struct Tick;
    impl Event<()> for Tick {
        fn listen(_state: Arc<State>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
            tokio::time::sleep(Duration::from_secs(1)).boxed()
        }
    }

    async fn tick_handler(_state: Arc<State>, _data: Box<()>, _: WithEvent<Tick>) {
        TICKS.fetch_add(1, Ordering::SeqCst);
    }

    struct Never;
    impl Event<u32> for Never {
        fn listen(_state: Arc<State>) -> Pin<Box<dyn Future<Output = u32> + Send>> {
            futures::future::pending().boxed()
        }
    }

    async fn never_handler(_state: Arc<State>, _data: Box<u32>, _: WithEvent<Never>) {}

    fn state() -> Arc<State> {
        let orchestrator = MountOrchestrator::new(
            Arc::new(GioMountProvider::default()),
            Arc::new(FileBookmarkSource::new("/nonexistent/bookmarks")),
            Arc::new(FileSettings::new("/nonexistent/config.yaml")),
        );
        Arc::new(State::new(
            orchestrator.clone(),
            PeriodicTrigger::new(Duration::from_secs(60)),
            SettingsWatcher::new(PathBuf::from("/nonexistent/config.yaml"), orchestrator),
        ))
    }

    #[tokio::test]
    async fn test_register_event() {
        let mut sync_loop = SyncLoop::new(state())
            .register_event(tick_handler)
            .register_event(never_handler);
        assert_eq!(sync_loop.event_handlers.len(), 2);
        assert_eq!(sync_loop.event_listeners.len(), 2);
        assert!(sync_loop.event_handlers.contains_key(&TypeId::of::<Tick>()));
        assert!(sync_loop.event_listeners.contains_key(&TypeId::of::<Never>()));
        sync_loop.gen_event_list();
        assert_eq!(sync_loop.event_listen_list.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_are_listened_continuously() {
        let sync_loop = SyncLoop::new(state()).register_event(tick_handler);
        let running = tokio::spawn(sync_loop.run());
        tokio::time::sleep(Duration::from_millis(3500)).await;
        running.abort();
        assert_eq!(TICKS.load(Ordering::SeqCst), 3);
    }
}
