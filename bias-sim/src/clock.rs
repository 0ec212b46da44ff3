//! Wall-clock timing that works both natively and in the browser.
//! `std::time::Instant` panics on `wasm32-unknown-unknown`, so the wasm build
//! reads `Date.now()` instead.

#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    #[cfg(not(target_arch = "wasm32"))]
    start: std::time::Instant,
    #[cfg(target_arch = "wasm32")]
    start_ms: f64,
}

impl Stopwatch {
    #[cfg(not(target_arch = "wasm32"))]
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    #[cfg(target_arch = "wasm32")]
    pub fn start() -> Self {
        Self {
            start_ms: js_sys::Date::now(),
        }
    }

    /// Seconds since [`Stopwatch::start`].
    #[cfg(not(target_arch = "wasm32"))]
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    #[cfg(target_arch = "wasm32")]
    pub fn elapsed_secs(&self) -> f64 {
        ((js_sys::Date::now() - self.start_ms) / 1000.0).max(0.0)
    }
}
