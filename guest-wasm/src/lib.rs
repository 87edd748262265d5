//! Demo module for the frame host: a ball bouncing around the canvas.
//!
//! Build with `cargo build -p guest-demo --target wasm32-unknown-unknown` and
//! run the resulting `guest_demo.wasm` with `framehost`. On other targets the
//! crate is empty.
#![cfg_attr(target_arch = "wasm32", no_std)]

#[cfg(target_arch = "wasm32")]
mod demo {
    use core::fmt::{self, Write};

    const WIDTH: f32 = 320.0;
    const HEIGHT: f32 = 200.0;
    const RADIUS: f32 = 12.0;

    const BACKGROUND: u32 = 0xFF20_1810;
    const BALL: u32 = 0xFF30_C0F0;

    mod env {
        extern "C" {
            pub fn set_canvas_size(width: i32, height: i32);
            pub fn clear_with_color(color: u32);
            pub fn fill_circle(x: f32, y: f32, radius: f32, color: u32);
            pub fn set_update_frame(index: usize);
            pub fn wasm_write_string(count: usize, data: *const u8, to_standard_error: bool);
        }
    }

    struct Ball {
        x: f32,
        y: f32,
        dx: f32,
        dy: f32,
        bounces: u32,
    }

    static mut BALL_STATE: Ball = Ball {
        x: WIDTH / 2.0,
        y: HEIGHT / 2.0,
        dx: 90.0,
        dy: 70.0,
        bounces: 0,
    };

    /// Console writer; the host joins fragments back into lines.
    struct Console {
        to_error: bool,
    }

    impl Write for Console {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            unsafe { env::wasm_write_string(s.len(), s.as_ptr(), self.to_error) };
            Ok(())
        }
    }

    fn log(args: fmt::Arguments<'_>) {
        let _ = Console { to_error: false }.write_fmt(args);
    }

    extern "C" fn update_frame(_context: i32, delta_seconds: f64) {
        let dt = delta_seconds as f32;
        // SAFETY: the host calls into the module from a single thread.
        let ball = unsafe { &mut *core::ptr::addr_of_mut!(BALL_STATE) };

        ball.x += ball.dx * dt;
        ball.y += ball.dy * dt;
        if ball.x < RADIUS || ball.x > WIDTH - RADIUS {
            ball.dx = -ball.dx;
            ball.x = ball.x.clamp(RADIUS, WIDTH - RADIUS);
            ball.bounces += 1;
            log(format_args!("bounce #{}\n", ball.bounces));
        }
        if ball.y < RADIUS || ball.y > HEIGHT - RADIUS {
            ball.dy = -ball.dy;
            ball.y = ball.y.clamp(RADIUS, HEIGHT - RADIUS);
            ball.bounces += 1;
            log(format_args!("bounce #{}\n", ball.bounces));
        }

        unsafe {
            env::clear_with_color(BACKGROUND);
            env::fill_circle(ball.x, ball.y, RADIUS, BALL);
        }
    }

    #[no_mangle]
    pub extern "C" fn main(_argc: i32, _argv: i64) {
        unsafe {
            env::set_canvas_size(WIDTH as i32, HEIGHT as i32);
            env::clear_with_color(BACKGROUND);
            // Function pointers are indices into the module's function table.
            env::set_update_frame(update_frame as usize);
        }
        log(format_args!("canvas {}x{} ready", WIDTH, HEIGHT));
        log(format_args!("\n"));
    }

    #[panic_handler]
    fn panic(_: &core::panic::PanicInfo) -> ! {
        core::arch::wasm32::unreachable()
    }
}
