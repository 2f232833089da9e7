use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use byteorder::{LittleEndian, WriteBytesExt};
use rusb::{Device, DeviceDescriptor, DeviceHandle, Direction, TransferType, UsbContext};
use util::Halftrack;

use crate::error::TransportError;
use crate::transport::{Command, Transport, TransportResult};

pub const USB_VID: u16 = 0x16c0;
pub const USB_PID: u16 = 0x05e1;

const BLOCK_SIZE: usize = 64;

// Every request starts with one of these words
const OP_SEEK: u32 = 0x4e494201;
const OP_DENSITY: u32 = 0x4e494202;
const OP_BITRATE: u32 = 0x4e494203;
const OP_MOTOR_ON: u32 = 0x4e494204;
const OP_COMMAND: u32 = 0x4e494205;
const OP_BURST_BYTE: u32 = 0x4e494206;
const OP_BURST_TRACK: u32 = 0x4e494207;
const OP_BURST_READ: u32 = 0x4e494208;
const OP_PROBE: u32 = 0x4e494209;

fn command_code(command: Command) -> u32 {
    match command {
        Command::Write => 0x01,
        Command::FillTrack => 0x02,
        Command::Capacity => 0x03,
        Command::AlignDisk => 0x04,
    }
}

fn open_usb_device<T: UsbContext>(
    context: &mut T,
    vid: u16,
    pid: u16,
) -> anyhow::Result<(Device<T>, DeviceDescriptor, DeviceHandle<T>)> {
    let devices = context.devices()?;

    for device in devices.iter() {
        let device_desc = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => {
                continue;
            }
        };

        if device_desc.vendor_id() == vid && device_desc.product_id() == pid {
            match device.open() {
                Ok(handle) => {
                    return Ok((device, device_desc, handle));
                }
                Err(e) => bail!("Device found but failed to open: {}", e),
            }
        }
    }

    Err(anyhow!("Unable to find the parallel cable bridge"))
}

fn map_usb_error(e: rusb::Error) -> TransportError {
    match e {
        rusb::Error::Timeout => TransportError::Timeout,
        e => TransportError::Usb(e),
    }
}

/// Drive attached through a USB bulk bridge to the parallel cable
pub struct UsbTransport {
    handle: DeviceHandle<rusb::Context>,
    endpoint_in: u8,
    endpoint_out: u8,
    timeout: Duration,
}

impl UsbTransport {
    pub fn open() -> anyhow::Result<Self> {
        let mut context = rusb::Context::new()?;

        let (device, _device_desc, mut handle) = open_usb_device(&mut context, USB_VID, USB_PID)?;

        // This seems to be optional for Linux but is required for Windows
        handle.claim_interface(0)?;

        let config_desc = device.config_descriptor(0)?;

        let mut endpoint_in_option: Option<u8> = None;
        let mut endpoint_out_option: Option<u8> = None;

        for interface in config_desc.interfaces() {
            for interface_desc in interface.descriptors() {
                for endpoint_desc in interface_desc.endpoint_descriptors() {
                    if endpoint_desc.direction() == Direction::Out
                        && endpoint_desc.transfer_type() == TransferType::Bulk
                    {
                        endpoint_out_option = Some(endpoint_desc.address());
                    }

                    if endpoint_desc.direction() == Direction::In
                        && endpoint_desc.transfer_type() == TransferType::Bulk
                    {
                        endpoint_in_option = Some(endpoint_desc.address());
                    }
                }
            }
        }

        let endpoint_in = endpoint_in_option.context("Endpoint In missing")?;
        let endpoint_out: u8 = endpoint_out_option.context("Endpoint Out missing")?;

        let transport = Self {
            handle,
            endpoint_in,
            endpoint_out,
            timeout: Duration::from_secs(10),
        };

        // it might be sometimes possible during an abort, that the endpoint
        // still contains data. Must be removed before proceeding
        transport.clear_buffers();

        Ok(transport)
    }

    fn clear_buffers(&self) {
        let timeout = Duration::from_millis(10);
        let mut in_buf = [0u8; BLOCK_SIZE];

        while let Ok(size) = self.handle.read_bulk(self.endpoint_in, &mut in_buf, timeout) {
            log::debug!("Cleared residual USB buffer of size {size}");
        }
    }

    fn request(&self, words: &[u32], payload: &[u8]) -> TransportResult<()> {
        let mut command_buf = Vec::with_capacity(words.len() * 4 + payload.len());
        for word in words {
            command_buf.write_u32::<LittleEndian>(*word)?;
        }
        command_buf.extend_from_slice(payload);

        for block in command_buf.chunks(BLOCK_SIZE) {
            self.handle
                .write_bulk(self.endpoint_out, block, self.timeout)
                .map_err(map_usb_error)?;
        }
        Ok(())
    }

    fn answer(&self) -> TransportResult<Vec<u8>> {
        let mut in_buf = [0u8; BLOCK_SIZE];
        let size = self
            .handle
            .read_bulk(self.endpoint_in, &mut in_buf, self.timeout)
            .map_err(map_usb_error)?;
        Ok(in_buf[..size].to_vec())
    }

    fn expect_ok(&self) -> TransportResult<()> {
        let answer = self.answer()?;
        match answer.as_slice() {
            b"Ok" => Ok(()),
            b"Timeout" => Err(TransportError::Timeout),
            _ => Err(TransportError::Protocol(
                String::from_utf8_lossy(&answer).into_owned(),
            )),
        }
    }
}

impl Transport for UsbTransport {
    fn seek_halftrack(&mut self, halftrack: Halftrack) -> TransportResult<()> {
        self.request(&[OP_SEEK, u32::from(halftrack.0)], &[])?;
        self.expect_ok()
    }

    fn set_density(&mut self, density: u8) -> TransportResult<()> {
        self.request(&[OP_DENSITY, u32::from(density & 3)], &[])?;
        self.expect_ok()
    }

    fn set_bitrate(&mut self, bitrate: u8) -> TransportResult<()> {
        self.request(&[OP_BITRATE, u32::from(bitrate & 3)], &[])?;
        self.expect_ok()
    }

    fn send_command(&mut self, command: Command, args: &[u8]) -> TransportResult<()> {
        self.request(
            &[OP_COMMAND, command_code(command), args.len() as u32],
            args,
        )?;
        self.expect_ok()
    }

    fn burst_write_byte(&mut self, byte: u8) -> TransportResult<()> {
        self.request(&[OP_BURST_BYTE, u32::from(byte)], &[])?;
        self.expect_ok()
    }

    fn burst_write_track(&mut self, data: &[u8]) -> TransportResult<bool> {
        self.request(&[OP_BURST_TRACK, data.len() as u32], data)?;
        match self.expect_ok() {
            Ok(()) => Ok(true),
            Err(TransportError::Timeout) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn burst_read_response(&mut self) -> TransportResult<u8> {
        self.request(&[OP_BURST_READ], &[])?;
        let answer = self.answer()?;
        match answer.as_slice() {
            [byte] => Ok(*byte),
            b"Timeout" => Err(TransportError::Timeout),
            _ => Err(TransportError::Protocol(
                String::from_utf8_lossy(&answer).into_owned(),
            )),
        }
    }

    fn probe_liveness(&mut self) -> TransportResult<bool> {
        self.request(&[OP_PROBE], &[])?;
        match self.expect_ok() {
            Ok(()) => Ok(true),
            Err(TransportError::Timeout) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn motor_on(&mut self) -> TransportResult<()> {
        self.request(&[OP_MOTOR_ON], &[])?;
        self.expect_ok()
    }

    fn sleep_ms(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}
