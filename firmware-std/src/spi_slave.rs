//! SPI slave transport for the range peer.
//!
//! esp-idf-hal has no slave driver, so this goes straight to the IDF
//! `spi_slave` API. Each exchange blocks until the master clocks a frame.

use core::ffi::c_void;

use esp_idf_svc::hal::delay::BLOCK;
use esp_idf_svc::sys::{
    esp, spi_bus_config_t, spi_common_dma_t_SPI_DMA_DISABLED, spi_host_device_t_SPI2_HOST,
    spi_slave_initialize, spi_slave_interface_config_t, spi_slave_transaction_t, spi_slave_transmit,
    EspError,
};

use proxtrack::link::{LinkTransport, FRAME_SIZE};

pub struct SpiSlaveLink {
    _initialized: (),
}

impl SpiSlaveLink {
    /// Claim SPI2 as a slave on the given pins (mode 0, no DMA).
    pub fn new(sclk: u8, mosi: u8, miso: u8, cs: u8) -> Result<Self, EspError> {
        let mut bus = spi_bus_config_t {
            sclk_io_num: sclk as i32,
            ..Default::default()
        };
        bus.__bindgen_anon_1.mosi_io_num = mosi as i32;
        bus.__bindgen_anon_2.miso_io_num = miso as i32;
        bus.__bindgen_anon_3.quadwp_io_num = -1;
        bus.__bindgen_anon_4.quadhd_io_num = -1;

        let slave = spi_slave_interface_config_t {
            spics_io_num: cs as i32,
            queue_size: 1,
            mode: 0,
            ..Default::default()
        };

        // SAFETY: both configs outlive the call, and SPI2 is not handed to any
        // other driver on a range peer.
        unsafe {
            esp!(spi_slave_initialize(
                spi_host_device_t_SPI2_HOST,
                &bus,
                &slave,
                spi_common_dma_t_SPI_DMA_DISABLED,
            ))?;
        }
        log::info!("SPI slave ready (SCLK {}, MOSI {}, MISO {}, CS {})", sclk, mosi, miso, cs);
        Ok(Self { _initialized: () })
    }
}

impl LinkTransport for SpiSlaveLink {
    fn exchange(&mut self, tx: &[u8; FRAME_SIZE], rx: &mut [u8; FRAME_SIZE]) -> proxtrack::Result<()> {
        // Without DMA the driver copies through its own FIFO, so stack
        // buffers are fine.
        let mut trans = spi_slave_transaction_t {
            length: FRAME_SIZE * 8,
            tx_buffer: tx.as_ptr() as *const c_void,
            rx_buffer: rx.as_mut_ptr() as *mut c_void,
            ..Default::default()
        };
        // SAFETY: the buffers stay borrowed until the blocking call returns.
        unsafe { esp!(spi_slave_transmit(spi_host_device_t_SPI2_HOST, &mut trans, BLOCK)) }
            .map_err(|_| proxtrack::Error::Transport)
    }
}
