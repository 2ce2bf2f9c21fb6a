//! Presence light firmware
//!
//! Boot sequence:
//! 1. Start the render task driving the LED strip
//! 2. Bring up Wi-Fi and the local control server
//! 3. Run the control loop: BOOT button, session ticks, reconnects

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    firmware::run()
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    anyhow::bail!("presence-light runs on ESP-IDF targets only; the library is host-testable with `cargo test`")
}

#[cfg(target_os = "espidf")]
mod firmware {
    use std::sync::{Arc, Mutex};

    use esp_idf_hal::delay::FreeRtos;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::log::EspLogger;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use log::{error, info, warn};

    use presence_light::animator::DirectiveSlot;
    use presence_light::button::Press;
    use presence_light::clock::Clock;
    use presence_light::device::{self, BootButton, EspClock, EspHttpTransport, NvsStore, Session, Station, Ws2812Sink};
    use presence_light::render::Renderer;

    /// LED strip data pin
    const LED_PIN: i32 = 27;

    /// Control loop period
    const LOOP_DELAY_MS: u32 = 50;

    /// Render task period, roughly 50 frames per second
    const FRAME_DELAY_MS: u32 = 20;

    const RENDER_STACK_SIZE: usize = 4 * 1024;

    pub fn run() -> anyhow::Result<()> {
        esp_idf_sys::link_patches();
        EspLogger::initialize_default();

        info!("presence-light v{} starting", env!("CARGO_PKG_VERSION"));

        let peripherals = Peripherals::take()?;
        let sys_loop = EspSystemEventLoop::take()?;
        let nvs = EspDefaultNvsPartition::take()?;

        let slot = Arc::new(DirectiveSlot::default());
        let documents = NvsStore::new(nvs.clone())?;
        let session: Session = Session::new(EspHttpTransport, documents, slot.clone(), EspClock);
        let num_leds = usize::from(session.settings().num_leds);
        let session = Arc::new(Mutex::new(session));

        let channel = peripherals.rmt.channel0;
        let pin = peripherals.pins.gpio27;
        let render_slot = slot.clone();
        std::thread::Builder::new()
            .name("render".into())
            .stack_size(RENDER_STACK_SIZE)
            .spawn(move || {
                let sink = match Ws2812Sink::new(channel, pin) {
                    Ok(sink) => sink,
                    Err(e) => {
                        error!("LED output unavailable: {:?}", e);
                        return;
                    }
                };
                info!("Driving {} LEDs on GPIO{}", num_leds, LED_PIN);
                let mut renderer = Renderer::new(sink, num_leds);
                loop {
                    if let Err(e) = renderer.service(&render_slot, EspClock.now_ms()) {
                        warn!("Frame write failed: {:?}", e);
                    }
                    FreeRtos::delay_ms(FRAME_DELAY_MS);
                }
            })?;

        let mut button = BootButton::new(peripherals.pins.gpio0)?;

        with_session(&session, |s| s.on_wifi_connecting())?;
        let mut station = Station::new(peripherals.modem, sys_loop, nvs)?;
        if let Err(e) = station.connect() {
            error!("Wi-Fi connect failed: {:?}", e);
        }
        if station.is_connected() {
            with_session(&session, |s| s.on_wifi_connected())?;
        }

        let _server = device::server::start(session.clone())?;

        info!("Entering control loop - press BOOT to start device login, hold to clear");

        loop {
            match button.poll(EspClock.now_ms()) {
                Some(Press::Short) => match with_session(&session, |s| s.start_device_login())? {
                    Ok(prompt) => info!("{}", prompt.message),
                    Err(e) => warn!("Device login not started: {}", e),
                },
                Some(Press::Long) => {
                    if let Err(e) = with_session(&session, |s| s.clear_all())? {
                        warn!("Clearing stored state failed: {}", e);
                    }
                }
                None => {}
            }

            if !station.is_connected() {
                warn!("Wi-Fi lost, reconnecting");
                with_session(&session, |s| s.on_wifi_connecting())?;
                match station.connect() {
                    Ok(()) => with_session(&session, |s| s.on_wifi_connected())?,
                    Err(e) => warn!("Reconnect failed: {:?}", e),
                }
            }

            with_session(&session, |s| s.tick())?;

            FreeRtos::delay_ms(LOOP_DELAY_MS);
        }
    }

    fn with_session<R>(session: &Mutex<Session>, f: impl FnOnce(&mut Session) -> R) -> anyhow::Result<R> {
        let mut guard = session
            .lock()
            .map_err(|_| anyhow::anyhow!("session lock poisoned"))?;
        Ok(f(&mut guard))
    }
}
