//! Typewriter renderer
//!
//! Decouples how fast text is shown from how fast it arrives. Arriving text
//! extends the confirmed length; a single reveal timer advances the revealed
//! length a few characters per tick until it catches up, then stops.
//! Lengths are counted in characters so a multi-byte character is never split.
//! Each step carries only the newly revealed characters.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// One reveal step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealFrame {
    /// Characters revealed by this step
    pub appended: String,
    /// `appended` is the whole visible text, not an extension of it
    pub replaces: bool,
    pub revealed: usize,
    pub confirmed: usize,
}

impl RevealFrame {
    /// Bring `visible` up to date with this step
    pub fn apply_to(&self, visible: &mut String) {
        if self.replaces {
            visible.clear();
        }
        visible.push_str(&self.appended);
    }
}

/// Receives every reveal step
pub trait RevealSink: Send + Sync {
    fn reveal(&self, frame: RevealFrame);
}

impl<F> RevealSink for F
where
    F: Fn(RevealFrame) + Send + Sync,
{
    fn reveal(&self, frame: RevealFrame) {
        self(frame)
    }
}

#[derive(Default)]
struct RevealState {
    text: String,
    confirmed: usize,
    revealed: usize,
    /// Byte offset of `revealed` in `text`
    revealed_bytes: usize,
    ticking: bool,
    finalized: bool,
    timer: Option<JoinHandle<()>>,
}

impl RevealState {
    /// Reveal up to `chars` more characters
    fn advance(&mut self, chars: usize) -> RevealFrame {
        let start = self.revealed_bytes;
        let pending = &self.text[start..];
        let step = chars.min(self.confirmed - self.revealed);
        let end = pending
            .char_indices()
            .nth(step)
            .map(|(index, _)| start + index)
            .unwrap_or(self.text.len());

        self.revealed += step;
        self.revealed_bytes = end;
        RevealFrame {
            appended: self.text[start..end].to_string(),
            replaces: false,
            revealed: self.revealed,
            confirmed: self.confirmed,
        }
    }
}

struct Inner {
    state: Mutex<RevealState>,
    sink: Arc<dyn RevealSink>,
    tick: Duration,
    chars_per_tick: usize,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, RevealState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Typewriter {
    inner: Arc<Inner>,
}

impl Typewriter {
    pub fn new(sink: Arc<dyn RevealSink>, tick: Duration, chars_per_tick: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RevealState::default()),
                sink,
                tick: tick.max(Duration::from_millis(1)),
                chars_per_tick: chars_per_tick.max(1),
            }),
        }
    }

    /// Confirm newly arrived text, starting the reveal timer if idle
    ///
    /// Must be called from within a tokio runtime.
    pub fn push(&self, delta: &str) {
        if delta.is_empty() {
            return;
        }

        let mut state = self.inner.lock();
        if state.finalized {
            return;
        }
        state.text.push_str(delta);
        state.confirmed += delta.chars().count();

        if !state.ticking {
            state.ticking = true;
            state.timer = Some(tokio::spawn(reveal_loop(self.inner.clone())));
        }
    }

    /// Show everything at once and tear the timer down
    ///
    /// `authoritative` replaces the confirmed text when the transport reports
    /// a final text that differs from the accumulated increments.
    pub fn finalize(&self, authoritative: Option<&str>) -> String {
        let mut state = self.inner.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.ticking = false;
        state.finalized = true;

        let replaced = match authoritative {
            Some(text) if text != state.text => {
                state.text = text.to_string();
                state.confirmed = text.chars().count();
                state.revealed = 0;
                state.revealed_bytes = 0;
                true
            }
            _ => false,
        };
        let remaining = state.confirmed - state.revealed;
        let mut frame = state.advance(remaining);
        frame.replaces = replaced;

        self.inner.sink.reveal(frame);
        state.text.clone()
    }

    /// All text received so far, revealed or not
    pub fn confirmed_text(&self) -> String {
        self.inner.lock().text.clone()
    }

    /// `(revealed, confirmed)` character counts
    pub fn lengths(&self) -> (usize, usize) {
        let state = self.inner.lock();
        (state.revealed, state.confirmed)
    }

    pub fn is_ticking(&self) -> bool {
        self.inner.lock().ticking
    }
}

impl Drop for Typewriter {
    fn drop(&mut self) {
        if let Some(timer) = self.inner.lock().timer.take() {
            timer.abort();
        }
    }
}

async fn reveal_loop(inner: Arc<Inner>) {
    let mut ticker = interval_at(Instant::now() + inner.tick, inner.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let mut state = inner.lock();
        if state.finalized {
            return;
        }

        let frame = state.advance(inner.chars_per_tick);
        inner.sink.reveal(frame);

        if state.revealed >= state.confirmed {
            debug!(revealed = state.revealed, "Reveal caught up, stopping timer");
            state.ticking = false;
            state.timer = None;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Frames(Mutex<Vec<RevealFrame>>);

    impl Frames {
        fn all(&self) -> Vec<RevealFrame> {
            self.0.lock().unwrap().clone()
        }

        /// Visible text after each step
        fn visible(&self) -> Vec<String> {
            let mut visible = String::new();
            self.all()
                .iter()
                .map(|frame| {
                    frame.apply_to(&mut visible);
                    visible.clone()
                })
                .collect()
        }
    }

    impl RevealSink for Frames {
        fn reveal(&self, frame: RevealFrame) {
            self.0.lock().unwrap().push(frame);
        }
    }

    fn typewriter(frames: &Arc<Frames>) -> Typewriter {
        Typewriter::new(frames.clone(), Duration::from_millis(10), 1)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reveals_one_char_per_tick_then_stops() {
        let frames = Arc::new(Frames::default());
        let writer = typewriter(&frames);

        writer.push("Hello");
        tokio::time::sleep(Duration::from_millis(200)).await;

        let all = frames.all();
        let revealed: Vec<usize> = all.iter().map(|f| f.revealed).collect();
        assert_eq!(revealed, vec![1, 2, 3, 4, 5]);
        assert_eq!(frames.visible().last().unwrap(), "Hello");
        assert!(all.iter().all(|f| f.revealed <= f.confirmed));
        assert!(!writer.is_ticking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_arrivals_share_one_timer() {
        let frames = Arc::new(Frames::default());
        let writer = typewriter(&frames);

        writer.push("ab");
        writer.push("cd");
        tokio::time::sleep(Duration::from_millis(15)).await;
        writer.push("ef");
        tokio::time::sleep(Duration::from_millis(200)).await;

        let revealed: Vec<usize> = frames.all().iter().map(|f| f.revealed).collect();
        assert_eq!(revealed, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalize_short_circuits() {
        let frames = Arc::new(Frames::default());
        let writer = typewriter(&frames);

        writer.push("Hello world");
        tokio::time::sleep(Duration::from_millis(25)).await;
        let text = writer.finalize(None);

        assert_eq!(text, "Hello world");
        assert_eq!(writer.lengths(), (11, 11));
        let count = frames.all().len();
        assert_eq!(frames.visible().last().unwrap(), "Hello world");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(frames.all().len(), count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multibyte_chars_are_never_split() {
        let frames = Arc::new(Frames::default());
        let writer = typewriter(&frames);

        writer.push("héllo ✓");
        tokio::time::sleep(Duration::from_millis(200)).await;

        let visible = frames.visible();
        assert_eq!(visible[1], "hé");
        assert_eq!(visible.last().unwrap(), "héllo ✓");
    }

    #[tokio::test(start_paused = true)]
    async fn test_authoritative_text_wins_on_finalize() {
        let frames = Arc::new(Frames::default());
        let writer = typewriter(&frames);

        writer.push("Hel");
        let text = writer.finalize(Some("Hello"));

        assert_eq!(text, "Hello");
        assert_eq!(writer.lengths(), (5, 5));
        let last = frames.all().pop().unwrap();
        assert!(last.replaces);
        assert_eq!(frames.visible().last().unwrap(), "Hello");
        writer.push("ignored");
        assert_eq!(writer.confirmed_text(), "Hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_steps_carry_only_new_characters() {
        let frames = Arc::new(Frames::default());
        let writer = Typewriter::new(frames.clone(), Duration::from_millis(10), 3);
        let long = "ß✓a".repeat(400);

        writer.push(&long);
        writer.push("!");
        tokio::time::sleep(Duration::from_secs(10)).await;

        let all = frames.all();
        assert_eq!(all.len(), 401);
        assert!(all.iter().all(|f| f.appended.chars().count() <= 3 && !f.replaces));
        assert_eq!(all[0].appended, "ß✓a");
        assert_eq!(all.last().unwrap().appended, "!");
        assert_eq!(frames.visible().last().unwrap(), &format!("{}!", long));
        assert_eq!(writer.lengths(), (1201, 1201));
    }
}
