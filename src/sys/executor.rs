//! A simple single-thread async executor for the host UI thread.
//!
//! All view/surface mutation and listener callbacks run on the thread that
//! calls [`Executor::run`]; remote-originated events are marshaled onto it by
//! draining their channels inside the main task. Wakes from other threads
//! unpark the host thread.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Wake};
use std::thread::{self, Thread};

pub struct Executor;

impl Executor {
    pub fn run(task: impl Future<Output = ()> + 'static) {
        let waker_impl = Arc::new(ThreadWaker {
            thread: thread::current(),
            woken: AtomicBool::new(true),
        });
        let waker = waker_impl.clone().into();
        let mut context = Context::from_waker(&waker);
        let mut task: Pin<Box<dyn Future<Output = ()>>> = Box::pin(task);

        loop {
            while waker_impl.woken.swap(false, Ordering::Acquire) {
                if task.as_mut().poll(&mut context).is_ready() {
                    return;
                }
            }
            // A wake between the check above and this park sets the park
            // permit, so park returns immediately.
            thread::park();
        }
    }
}

struct ThreadWaker {
    thread: Thread,
    woken: AtomicBool,
}

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) { self.wake_by_ref() }

    fn wake_by_ref(self: &Arc<Self>) {
        self.woken.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

/// Yields to the executor once, letting sibling `select!` branches run.
pub async fn yield_now() {
    #[derive(Default)]
    struct YieldOnce(bool);

    impl Future for YieldOnce {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            if self.0 {
                return Poll::Ready(());
            }
            self.0 = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }

    YieldOnce::default().await
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;
    use std::{future, thread};

    use super::*;

    #[test]
    fn executor_runs() {
        Executor::run(future::ready(()));
        Executor::run(yield_now());

        let x = Rc::new(Cell::new(0));
        let x2 = x.clone();
        Executor::run(async move {
            x2.set(x2.get() + 1);
            yield_now().await;
            x2.set(x2.get() + 1);
        });
        assert_eq!(2, x.get());
    }

    #[test]
    fn channel_works() {
        use tokio::sync::mpsc;

        let (tx, mut rx) = mpsc::unbounded_channel();

        thread::spawn(move || {
            thread::sleep(Duration::from_millis(25));
            _ = tx.send(());
            _ = tx.send(());
            drop(tx);
        });

        let msgs = Rc::new(Cell::new(0));
        let msgs2 = msgs.clone();

        Executor::run(async move {
            while let Some(_msg) = rx.recv().await {
                msgs2.set(msgs2.get() + 1);
                yield_now().await;
            }
        });

        assert_eq!(2, msgs.get());
    }

    #[test]
    fn cross_thread_wake_unparks() {
        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();

        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            _ = tx.send(7);
        });

        let got = Rc::new(Cell::new(0));
        let got2 = got.clone();
        Executor::run(async move {
            got2.set(rx.await.unwrap());
        });
        assert_eq!(7, got.get());
    }
}
