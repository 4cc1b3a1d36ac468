//! The flashing session.
//!
//! Drives a powered-off board all the way to a flashed bootloader:
//!
//! 1. wait for the power-on banner
//! 2. handshake (device discovery)
//! 3. head area to offset 0
//! 4. auxiliary code to its load address
//! 5. variant step: decrypt request or board information query
//! 6. default boot register table to the list address
//! 7. full image to offset 0
//!
//! The order is fixed by the bootROM; phases only move forward, and a call
//! out of order is a protocol violation rather than a silent no-op.

use log::{info, warn};

use crate::chip::{
    board_info_query, decrypt_request, decrypt_succeeded, BoardFrameResult, ChipIdResult,
    DeviceVariant, TypeFrameResult, BOARD_RESULT_WIRE_LEN, DECRYPT_RESULT_WIRE_LEN,
};
use crate::error::{Error, Result};
use crate::image::FastbootImage;
use crate::port::Port;
use crate::protocol::transfer::send_file;
use crate::protocol::transport::{Expect, Transport, RESULT_POLICY};

/// Session phases, strictly in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    AwaitPowerOn,
    Handshake,
    Transfer,
    Done,
}

/// What the handshake learned about the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceInfo {
    /// Hi3798 family type/capability result.
    Type(TypeFrameResult),
    /// Hi3716 family chip identifier.
    ChipId(ChipIdResult),
}

/// Transfer stages reported to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashStage {
    /// Head area (everything before the auxiliary code).
    HeadArea,
    /// Auxiliary code blob.
    AuxCode,
    /// Default boot register table.
    BootReg,
    /// The complete image.
    FullImage,
}

impl FlashStage {
    /// Human-readable stage name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::HeadArea => "head area",
            Self::AuxCode => "auxiliary code",
            Self::BootReg => "boot registers",
            Self::FullImage => "full image",
        }
    }
}

/// A flashing session over one serial port.
pub struct Flasher<P: Port> {
    transport: Transport<P>,
    variant: DeviceVariant,
    phase: Phase,
}

impl<P: Port> Flasher<P> {
    /// Create a session. Device diagnostic output goes to `console`.
    pub fn new(port: P, variant: DeviceVariant, console: Box<dyn std::io::Write + Send>) -> Self {
        Self {
            transport: Transport::new(port, console),
            variant,
            phase: Phase::AwaitPowerOn,
        }
    }

    fn expect_phase(&self, phase: Phase, what: &str) -> Result<()> {
        if self.phase != phase {
            return Err(Error::Protocol(format!(
                "{what} attempted in the wrong session phase ({:?})",
                self.phase
            )));
        }
        Ok(())
    }

    /// Wait for the board to power on, then switch the receive side to the
    /// background reader.
    pub fn wait_power_on(&mut self) -> Result<()> {
        self.expect_phase(Phase::AwaitPowerOn, "power-on wait")?;
        info!(
            "waiting for power-on on {} (power-cycle the board now)",
            self.transport
                .port_name()
        );
        self.transport
            .wait_power_on()?;
        self.transport
            .start_reader()?;
        self.phase = Phase::Handshake;
        Ok(())
    }

    /// Identify the device.
    pub fn handshake(&mut self) -> Result<DeviceInfo> {
        self.expect_phase(Phase::Handshake, "handshake")?;
        let query = self
            .variant
            .handshake_query();
        let frame = self
            .transport
            .send_and_await(
                &query,
                Expect::Result {
                    code: 0xBD,
                    wire_len: self
                        .variant
                        .handshake_result_len(),
                },
                RESULT_POLICY,
            )?
            .ok_or_else(|| Error::Protocol("handshake answered with a bare ACK".into()))?;

        let info = match self.variant {
            DeviceVariant::Hi3798 => {
                let result = TypeFrameResult::parse(&frame)?;
                info!("device: {result}");
                DeviceInfo::Type(result)
            }
            DeviceVariant::Hi3716 => {
                let result = ChipIdResult::parse(&frame)?;
                info!("device chip id: {:#018x}", result.chip_id);
                DeviceInfo::ChipId(result)
            }
        };
        self.phase = Phase::Transfer;
        Ok(info)
    }

    /// Flash the image. `progress` receives `(stage, sent, total)` over the
    /// padded byte counts of the stage in flight.
    pub fn flash(
        &mut self,
        image: &FastbootImage,
        mut progress: impl FnMut(FlashStage, usize, usize),
    ) -> Result<()> {
        self.expect_phase(Phase::Transfer, "flash")?;

        info!("sending head area");
        send_file(&mut self.transport, image.head_area(), 0, |sent, total| {
            progress(FlashStage::HeadArea, sent, total);
        })?;

        info!("sending auxiliary code");
        send_file(
            &mut self.transport,
            image.aux_code(),
            image.auxcode_addr(),
            |sent, total| progress(FlashStage::AuxCode, sent, total),
        )?;

        self.variant_step()?;

        info!("sending boot register table");
        send_file(
            &mut self.transport,
            image.bootreg_default(),
            image.bootregs_addr(),
            |sent, total| progress(FlashStage::BootReg, sent, total),
        )?;

        info!("sending full image");
        send_file(&mut self.transport, image.image(), 0, |sent, total| {
            progress(FlashStage::FullImage, sent, total);
        })?;

        self.phase = Phase::Done;
        info!("flash complete");
        Ok(())
    }

    // After the auxiliary code is loaded, Hi3716 parts must be told to
    // decrypt it; Hi3798 parts answer a board status query instead.
    fn variant_step(&mut self) -> Result<()> {
        if self
            .variant
            .needs_decrypt()
        {
            let frame = self
                .transport
                .send_and_await(
                    &decrypt_request(),
                    Expect::Result {
                        code: 0xDC,
                        wire_len: DECRYPT_RESULT_WIRE_LEN,
                    },
                    RESULT_POLICY,
                )?
                .ok_or_else(|| Error::Protocol("decrypt answered with a bare ACK".into()))?;
            if !decrypt_succeeded(&frame) {
                return Err(Error::Protocol(
                    "device reported auxiliary code decrypt failure".into(),
                ));
            }
            info!("auxiliary code decrypted");
        } else if self
            .variant
            .supports_board_info()
        {
            let frame = self
                .transport
                .send_and_await(
                    &board_info_query(),
                    Expect::Result {
                        code: 0xCE,
                        wire_len: BOARD_RESULT_WIRE_LEN,
                    },
                    RESULT_POLICY,
                )?
                .ok_or_else(|| Error::Protocol("board query answered with a bare ACK".into()))?;
            let board = BoardFrameResult::parse(&frame)?;
            if board.status != 0 {
                warn!("board status {:#010x}", board.status);
            } else {
                info!("board status ok");
            }
        }
        Ok(())
    }

    /// Run the whole session in order.
    pub fn run(
        &mut self,
        image: &FastbootImage,
        progress: impl FnMut(FlashStage, usize, usize),
    ) -> Result<DeviceInfo> {
        self.wait_power_on()?;
        let info = self.handshake()?;
        self.flash(image, progress)?;
        Ok(info)
    }

    /// Tear down the session and hand back the port, e.g. for a terminal
    /// handoff to the freshly booted system.
    pub fn finish(self) -> P {
        self.transport
            .finish()
    }
}
