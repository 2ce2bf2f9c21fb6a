//! Wi-Fi station bring-up
//!
//! Credentials are baked in at build time from `WIFI_SSID` and `WIFI_PASS`.

use anyhow::anyhow;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
use log::{info, warn};

const SSID: &str = match option_env!("WIFI_SSID") {
    Some(ssid) => ssid,
    None => "",
};
const PASSWORD: &str = match option_env!("WIFI_PASS") {
    Some(password) => password,
    None => "",
};

/// Attempts per call to [`Station::connect`]
const CONNECT_ATTEMPTS: u32 = 5;
const RETRY_DELAY_MS: u32 = 2_000;

pub struct Station {
    wifi: BlockingWifi<EspWifi<'static>>,
}

impl Station {
    /// Configure the driver as a station; does not connect yet
    pub fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
    ) -> anyhow::Result<Self> {
        if SSID.is_empty() {
            return Err(anyhow!("WIFI_SSID was not set at build time"));
        }

        let mut wifi = BlockingWifi::wrap(EspWifi::new(modem, sys_loop.clone(), Some(nvs))?, sys_loop)?;
        wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid: SSID.try_into().map_err(|_| anyhow!("SSID too long"))?,
            password: PASSWORD.try_into().map_err(|_| anyhow!("Wi-Fi password too long"))?,
            auth_method: if PASSWORD.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        }))?;
        wifi.start()?;

        Ok(Self { wifi })
    }

    /// Connect and wait for an IP address, retrying a few times
    pub fn connect(&mut self) -> anyhow::Result<()> {
        let mut attempt = 1;
        loop {
            match self.try_connect() {
                Ok(()) => break,
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    warn!("Wi-Fi connect attempt {} failed: {:?}", attempt, e);
                    attempt += 1;
                    esp_idf_hal::delay::FreeRtos::delay_ms(RETRY_DELAY_MS);
                }
                Err(e) => return Err(e),
            }
        }

        let ip = self.wifi.wifi().sta_netif().get_ip_info()?;
        info!("Wi-Fi connected to {}, address {}", SSID, ip.ip);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }

    fn try_connect(&mut self) -> anyhow::Result<()> {
        self.wifi.connect()?;
        self.wifi.wait_netif_up()?;
        Ok(())
    }
}
