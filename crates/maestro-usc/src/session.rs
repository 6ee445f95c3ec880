//! One controller, one transport, strictly sequential transfers.

use crate::config::SessionConfig;
use crate::decode;
use crate::error::{Diagnostic, ProtocolError, Result};
use crate::metrics::{MetricsHub, TransferMetrics};
use crate::params::{self, Parameter, ParameterWrite, Request};
use crate::script::ScriptImage;
use crate::settings::{decode_settings, encode_settings, fix_settings};
use crate::types::{
    CompiledProgram, FirmwareVersion, ScriptState, StatusKind, StatusReport, UscSettings,
};
use crate::variant::DeviceVariant;
use std::time::Duration;
use tracing::{debug, info, warn};
use usb_transport::{ControlSetup, UsbTransport};

/// GET_DESCRIPTOR for the device descriptor.
const GET_DESCRIPTOR: u8 = 6;
const DEVICE_DESCRIPTOR: u16 = 0x0100;

/// Acceleration shares SET_SERVO_VARIABLE with speed; this bit in the index selects it.
const ACCELERATION_FLAG: u16 = 0x80;

/// The value that makes the firmware reload factory settings on the next reinitialize.
const UNINITIALIZED: u16 = 0xFF;

/// Channel whose target switches PWM off, by model.
fn pwm_disable_channel(product_id: u16) -> u8 {
    if product_id == 0x008A {
        8
    } else {
        12
    }
}

pub struct DeviceSession<T: UsbTransport> {
    transport: T,
    variant: DeviceVariant,
    config: SessionConfig,
    metrics: Option<TransferMetrics>,
}

impl<T: UsbTransport> DeviceSession<T> {
    /// Bind a session to an opened transport. The variant is fixed from its product id.
    pub fn new(mut transport: T, config: SessionConfig) -> Result<Self> {
        let variant = DeviceVariant::from_product_id(transport.product_id())?;
        transport.set_timeout(config.timeout());
        info!(
            product_id = variant.product_id,
            servo_count = variant.servo_count,
            "maestro session opened"
        );
        Ok(Self {
            transport,
            variant,
            config,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, hub: &MetricsHub) -> Self {
        self.metrics = Some(hub.usb.clone());
        self
    }

    pub fn variant(&self) -> &DeviceVariant {
        &self.variant
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn send(&mut self, setup: ControlSetup, data: &[u8]) -> Result<()> {
        debug!(%setup, len = data.len(), "control out");
        self.transport.control_out(setup, data)?;
        if let Some(m) = &self.metrics {
            m.control_out.inc();
        }
        Ok(())
    }

    fn request(&mut self, request: Request, value: u16, index: u16) -> Result<()> {
        self.send(request.setup(value, index), &[])
    }

    fn receive(&mut self, setup: ControlSetup, length: usize) -> Result<Vec<u8>> {
        debug!(%setup, length, "control in");
        let buf = self.transport.control_in(setup, length)?;
        if let Some(m) = &self.metrics {
            m.control_in.inc();
        }
        Ok(buf)
    }

    fn write_parameter(&mut self, write: &ParameterWrite) -> Result<()> {
        self.send(write.setup(), &[])?;
        if let Some(m) = &self.metrics {
            m.parameter_writes.inc();
        }
        Ok(())
    }

    /// Range-checked write of a single parameter.
    pub fn set_raw_parameter(&mut self, id: Parameter, value: i64) -> Result<()> {
        let write = ParameterWrite::new(id, value)?;
        self.write_parameter(&write)
    }

    pub fn get_raw_parameter(&mut self, id: Parameter) -> Result<u16> {
        let width = params::range_of(id)?.width;
        let buf = self.receive(
            Request::GetParameter.setup(0, u16::from(id.0)),
            usize::from(width),
        )?;
        params::decode(id, &buf)
    }

    /// Reconcile `settings` with this device and write them.
    ///
    /// Everything is encoded and validated first, so a rejected value issues no transfers.
    /// With `upload_script`, the settings' compiled program is uploaded with its checksum
    /// unless it is missing or marked inconsistent, which is reported as a diagnostic.
    pub fn apply_usc_settings(
        &mut self,
        settings: &UscSettings,
        upload_script: bool,
    ) -> Result<Vec<Diagnostic>> {
        let (settings, mut diagnostics) = fix_settings(settings.clone(), &self.variant);
        let writes = encode_settings(&settings, &self.variant)?;

        let mut script = None;
        if upload_script {
            match &settings.program {
                _ if settings.script_inconsistent => {
                    diagnostics.push(Diagnostic::ScriptInconsistent)
                }
                None => diagnostics.push(Diagnostic::ScriptMissing),
                Some(program) => {
                    script = Some((program, ScriptImage::build(program, &self.variant)?))
                }
            }
            if script.is_none() {
                if let Some(d) = diagnostics.last() {
                    warn!("{d}");
                }
            }
        }

        info!(writes = writes.len(), upload = script.is_some(), "applying settings");
        for write in &writes {
            self.write_parameter(write)?;
        }
        if let Some((program, image)) = script {
            self.write_script(program, &image, true)?;
        }
        Ok(diagnostics)
    }

    pub fn read_usc_settings(&mut self) -> Result<UscSettings> {
        let variant = self.variant;
        let settings = decode_settings(&variant, |p| self.get_raw_parameter(p))?;
        info!(channels = settings.channels.len(), "read settings");
        Ok(settings)
    }

    /// Query one facet of the runtime state.
    ///
    /// The compact variant answers every facet from a single combined read; the extended
    /// variant issues a dedicated request per facet.
    pub fn read_status(&mut self, kind: StatusKind) -> Result<StatusReport> {
        let layout = self.variant.layout;
        let query = layout.status_query(&self.variant, kind);
        let buf = self.receive(query.request.setup(0, 0), query.length)?;
        if buf.len() != query.length {
            return Err(ProtocolError::ShortRead {
                what: "status",
                expected: query.length,
                actual: buf.len(),
            }
            .into());
        }
        Ok(layout.decode_status(&self.variant, kind, &buf)?)
    }

    /// Target position in quarter-microseconds; 0 stops sending pulses.
    pub fn set_target(&mut self, channel: u8, target: u16) -> Result<()> {
        self.variant.check_channel(channel)?;
        self.request(Request::SetTarget, target, u16::from(channel))
    }

    pub fn set_speed(&mut self, channel: u8, speed: u16) -> Result<()> {
        self.variant.check_channel(channel)?;
        self.request(Request::SetServoVariable, speed, u16::from(channel))
    }

    pub fn set_acceleration(&mut self, channel: u8, acceleration: u16) -> Result<()> {
        self.variant.check_channel(channel)?;
        self.request(
            Request::SetServoVariable,
            acceleration,
            u16::from(channel) | ACCELERATION_FLAG,
        )
    }

    /// Erase the script and the subroutine table.
    pub fn erase_script(&mut self) -> Result<()> {
        self.request(Request::EraseScript, 0, 0)
    }

    pub fn upload_script(&mut self, program: &CompiledProgram, with_checksum: bool) -> Result<()> {
        let image = ScriptImage::build(program, &self.variant)?;
        self.write_script(program, &image, with_checksum)
    }

    fn write_script(
        &mut self,
        program: &CompiledProgram,
        image: &ScriptImage,
        with_checksum: bool,
    ) -> Result<()> {
        let checksum = if with_checksum {
            let computed = program.compute_checksum()?;
            if computed != program.checksum {
                warn!(
                    given = program.checksum,
                    computed, "program checksum does not match its contents"
                );
            }
            Some(ParameterWrite::new(Parameter::SCRIPT_CRC, i64::from(program.checksum))?)
        } else {
            None
        };
        let table = image.table_blocks();
        let code = image.code_blocks();
        info!(
            bytes = image.byte_code.len(),
            blocks = code.len(),
            checksum = with_checksum,
            "uploading script"
        );

        self.set_script_done(ScriptState::Stop)?;
        self.erase_script()?;
        for block in table.iter().chain(&code) {
            self.send(Request::WriteScript.setup(0, block.index), &block.data)?;
            if let Some(m) = &self.metrics {
                m.script_blocks.inc();
            }
        }
        if let Some(write) = checksum {
            self.write_parameter(&write)?;
        }
        self.reinitialize_with(self.config.settle.script_upload_ms)
    }

    /// Stop the script and point it at `subroutine`; it stays paused until resumed.
    pub fn restart_script_at_subroutine(&mut self, subroutine: u8) -> Result<()> {
        self.request(Request::RestartScriptAtSubroutine, 0, u16::from(subroutine))
    }

    /// As [`Self::restart_script_at_subroutine`], with `parameter` pushed on the stack.
    pub fn restart_script_at_subroutine_with_parameter(
        &mut self,
        subroutine: u8,
        parameter: i16,
    ) -> Result<()> {
        self.request(
            Request::RestartScriptAtSubroutineWithParameter,
            parameter as u16,
            u16::from(subroutine),
        )
    }

    pub fn restart_script(&mut self) -> Result<()> {
        self.request(Request::RestartScript, 0, 0)
    }

    pub fn set_script_done(&mut self, state: ScriptState) -> Result<()> {
        self.request(Request::SetScriptDone, state as u16, 0)
    }

    pub fn clear_errors(&mut self) -> Result<()> {
        self.request(Request::ClearErrors, 0, 0)
    }

    /// Reboot into the bootloader. The session is unusable afterwards.
    pub fn start_bootloader(&mut self) -> Result<()> {
        info!("starting bootloader");
        self.request(Request::StartBootloader, 0, 0)
    }

    pub fn set_pwm(&mut self, duty_cycle: u16, period: u16) -> Result<()> {
        if self.variant.is_compact() {
            return Err(ProtocolError::Unsupported("pwm output").into());
        }
        self.request(Request::SetPwm, duty_cycle, period)
    }

    pub fn disable_pwm(&mut self) -> Result<()> {
        if self.variant.is_compact() {
            return Err(ProtocolError::Unsupported("pwm output").into());
        }
        self.set_target(pwm_disable_channel(self.variant.product_id), 0)
    }

    pub fn reinitialize(&mut self) -> Result<()> {
        self.reinitialize_with(self.config.settle.reinitialize_ms)
    }

    fn reinitialize_with(&mut self, settle_ms: u64) -> Result<()> {
        info!(settle_ms, "reinitializing");
        self.request(Request::Reinitialize, 0, 0)?;
        if self.variant.layout.refetch_after_reinitialize() {
            self.read_status(StatusKind::Variables)?;
        }
        if settle_ms > 0 {
            std::thread::sleep(Duration::from_millis(settle_ms));
        }
        Ok(())
    }

    /// Mark the settings uninitialized so the firmware reloads its defaults, then reinitialize.
    pub fn restore_default_configuration(&mut self) -> Result<()> {
        let index = (1u16 << 8) | u16::from(Parameter::INITIALIZED.0);
        self.send(Request::SetParameter.setup(UNINITIALIZED, index), &[])?;
        self.reinitialize_with(self.config.settle.restore_defaults_ms)
    }

    pub fn firmware_version(&mut self) -> Result<FirmwareVersion> {
        let desc = self.receive(
            ControlSetup::standard(GET_DESCRIPTOR, DEVICE_DESCRIPTOR, 0),
            decode::DEVICE_DESCRIPTOR_LEN,
        )?;
        Ok(decode::firmware_version(&desc)?)
    }
}
