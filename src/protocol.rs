use crate::Error;

#[cfg(feature = "protocol_serde")]
use serde::{Deserialize, Serialize};

/// Number of series cells reported by the pack.
pub const CELL_COUNT: usize = 4;

const TX_BUFFER_LENGTH: usize = 5;
const START_BYTE: u8 = 0xEE;

/// Request opcodes understood by the battery.
///
/// Each opcode is answered with two consecutive frames, one per read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Answered with the info frame, then the temperature frame.
    ReadPrimary = 0xC1,
    /// Answered with the capacity/cycles frame, then the cell voltage frame.
    ReadSecondary = 0xC2,
}

impl Command {
    /// Build the outgoing command buffer for this opcode.
    ///
    /// The layout is a fixed vendor contract: start byte, opcode, zero padding.
    pub fn request(self) -> Vec<u8> {
        let mut tx_buffer = vec![0; TX_BUFFER_LENGTH];
        tx_buffer[0] = START_BYTE;
        tx_buffer[1] = self as u8;
        tx_buffer
    }
}

/// Read a little-endian signed short.
pub fn get_le_short(data: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Read a little-endian unsigned short.
pub fn get_le_ushort(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Read a 3-byte little-endian signed integer.
pub fn get_le_int3(data: &[u8], offset: usize) -> i32 {
    let val = data[offset] as i32 | (data[offset + 1] as i32) << 8 | (data[offset + 2] as i32) << 16;
    if val & 0x80_0000 != 0 {
        val - 0x100_0000
    } else {
        val
    }
}

/// Read a 3-byte big-endian unsigned integer.
///
/// No current frame uses this order; it is kept public for buffer inspection.
pub fn get_be_uint3(data: &[u8], offset: usize) -> u32 {
    (data[offset] as u32) << 16 | (data[offset + 1] as u32) << 8 | data[offset + 2] as u32
}

fn validate_len(buffer: &[u8], frame: u16, required: usize) -> std::result::Result<(), Error> {
    if buffer.len() < required {
        log::warn!(
            "Invalid buffer size for frame 0x{:04X} - required={} received={}",
            frame,
            required,
            buffer.len()
        );
        return Err(Error::InvalidFrame {
            frame,
            required,
            actual: buffer.len(),
        });
    }
    Ok(())
}

/// Pack voltage, current and state of charge.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
pub struct Info {
    /// Battery voltage in volts, reconstructed from the four cell readings.
    pub voltage: f64,
    /// Current in amps, sign distinguishes charge from discharge.
    pub current: f64,
    /// State of charge in percent.
    pub soc: u16,
}

impl Info {
    pub const FRAME_ID: u16 = 0xCCF0;

    pub fn reply_size() -> usize {
        18
    }

    pub fn decode(rx_buffer: &[u8]) -> std::result::Result<Self, Error> {
        validate_len(rx_buffer, Self::FRAME_ID, Self::reply_size())?;
        let cells = [
            get_le_ushort(rx_buffer, 0),
            get_le_ushort(rx_buffer, 2),
            get_le_ushort(rx_buffer, 4),
            get_le_ushort(rx_buffer, 6),
        ];
        let sum: f64 = cells.iter().map(|&c| c as f64).sum();
        Ok(Self {
            voltage: (sum / cells.len() as f64) * 4.0 / 1000.0,
            current: get_le_int3(rx_buffer, 8) as f64 / 10.0,
            soc: get_le_ushort(rx_buffer, 16),
        })
    }
}

/// Pack temperature.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
pub struct Temperature {
    /// Temperature in degrees Celsius.
    pub temperature: f64,
}

impl Temperature {
    pub const FRAME_ID: u16 = 0xCCF2;

    pub fn reply_size() -> usize {
        7
    }

    pub fn decode(rx_buffer: &[u8]) -> std::result::Result<Self, Error> {
        validate_len(rx_buffer, Self::FRAME_ID, Self::reply_size())?;
        Ok(Self {
            temperature: get_le_short(rx_buffer, 5) as f64 / 10.0,
        })
    }
}

/// Rated capacity and cycle count.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
pub struct CapacityCycles {
    /// Rated capacity in amp hours.
    pub capacity: f64,
    pub num_cycles: u16,
}

impl CapacityCycles {
    pub const FRAME_ID: u16 = 0xCCF3;

    pub fn reply_size() -> usize {
        6
    }

    pub fn decode(rx_buffer: &[u8]) -> std::result::Result<Self, Error> {
        validate_len(rx_buffer, Self::FRAME_ID, Self::reply_size())?;
        Ok(Self {
            capacity: get_le_ushort(rx_buffer, 0) as f64 / 100.0,
            num_cycles: get_le_ushort(rx_buffer, 4),
        })
    }
}

/// Per-cell voltages in read order.
pub struct CellVoltages;

impl CellVoltages {
    pub const FRAME_ID: u16 = 0xCCF4;

    pub fn reply_size() -> usize {
        CELL_COUNT * 2
    }

    pub fn decode(rx_buffer: &[u8]) -> std::result::Result<Vec<f64>, Error> {
        validate_len(rx_buffer, Self::FRAME_ID, Self::reply_size())?;
        let mut result = Vec::with_capacity(CELL_COUNT);
        for n_cell in 0..CELL_COUNT {
            result.push(get_le_ushort(rx_buffer, n_cell * 2) as f64 / 1000.0);
        }
        Ok(result)
    }
}

/// Raw response buffers accumulated during one polling cycle.
///
/// One fixed slot per required frame; buffers with any other identifier are
/// dropped on insert.
#[derive(Debug, Default)]
pub struct ResponseSet {
    info: Option<Vec<u8>>,
    temperature: Option<Vec<u8>>,
    capacity_cycles: Option<Vec<u8>>,
    cell_voltages: Option<Vec<u8>>,
}

impl ResponseSet {
    pub fn insert(&mut self, frame: u16, data: Vec<u8>) {
        match frame {
            Info::FRAME_ID => self.info = Some(data),
            Temperature::FRAME_ID => self.temperature = Some(data),
            CapacityCycles::FRAME_ID => self.capacity_cycles = Some(data),
            CellVoltages::FRAME_ID => self.cell_voltages = Some(data),
            other => log::debug!("Ignoring unexpected frame 0x{:04X}", other),
        }
    }

    /// True once all four required frames have been captured.
    pub fn is_complete(&self) -> bool {
        self.info.is_some()
            && self.temperature.is_some()
            && self.capacity_cycles.is_some()
            && self.cell_voltages.is_some()
    }

    fn require(slot: &Option<Vec<u8>>, frame: u16) -> std::result::Result<&[u8], Error> {
        slot.as_deref().ok_or(Error::MissingFrame { frame })
    }
}

/// The decoded result of one successful polling cycle.
///
/// Constructed only by [`Telemetry::aggregate`] from a complete response set;
/// a later cycle replaces the value rather than mutating it.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
pub struct Telemetry {
    /// Battery voltage in volts.
    pub voltage: f64,
    /// Current in amps, sign distinguishes charge from discharge.
    pub current: f64,
    /// State of charge in percent.
    pub soc: u16,
    /// Pack temperature in degrees Celsius.
    pub temperature: f64,
    /// Rated capacity in amp hours.
    pub capacity: f64,
    pub num_cycles: u16,
    /// Per-cell voltages in volts, read order.
    pub cell_voltages: Vec<f64>,
}

impl Telemetry {
    /// Decode all four frames of a complete response set into one snapshot.
    ///
    /// Fails with [`Error::MissingFrame`] before any decode when a slot is
    /// empty, and with [`Error::InvalidFrame`] when a buffer is too short.
    pub fn aggregate(responses: &ResponseSet) -> std::result::Result<Self, Error> {
        let info_buf = ResponseSet::require(&responses.info, Info::FRAME_ID)?;
        let temperature_buf = ResponseSet::require(&responses.temperature, Temperature::FRAME_ID)?;
        let capacity_buf =
            ResponseSet::require(&responses.capacity_cycles, CapacityCycles::FRAME_ID)?;
        let cells_buf = ResponseSet::require(&responses.cell_voltages, CellVoltages::FRAME_ID)?;

        let info = Info::decode(info_buf)?;
        let temperature = Temperature::decode(temperature_buf)?;
        let capacity_cycles = CapacityCycles::decode(capacity_buf)?;
        let cell_voltages = CellVoltages::decode(cells_buf)?;

        Ok(Self {
            voltage: info.voltage,
            current: info.current,
            soc: info.soc,
            temperature: temperature.temperature,
            capacity: capacity_cycles.capacity,
            num_cycles: capacity_cycles.num_cycles,
            cell_voltages,
        })
    }
}

/// Spread statistics over the per-cell voltages.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
pub struct CellStats {
    pub max: f64,
    pub min: f64,
    pub avg: f64,
    pub median: f64,
    /// Difference between the highest and lowest cell.
    pub delta: f64,
    /// Index of the first cell holding the maximum value.
    pub index_max: usize,
    /// Index of the first cell holding the minimum value.
    pub index_min: usize,
}

impl CellStats {
    /// Compute the statistics, or `None` for an empty slice.
    pub fn from_cells(cells: &[f64]) -> Option<Self> {
        if cells.is_empty() {
            return None;
        }
        let mut index_max = 0;
        let mut index_min = 0;
        for (n_cell, &volt) in cells.iter().enumerate() {
            if volt > cells[index_max] {
                index_max = n_cell;
            }
            if volt < cells[index_min] {
                index_min = n_cell;
            }
        }
        let max = cells[index_max];
        let min = cells[index_min];

        let mut sorted = cells.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        Some(Self {
            max,
            min,
            avg: cells.iter().sum::<f64>() / cells.len() as f64,
            median,
            delta: max - min,
            index_max,
            index_min,
        })
    }
}

/// Metrics computed from a snapshot rather than read from the wire.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
pub struct DerivedMetrics {
    /// Instantaneous power in watts.
    pub power: f64,
    /// Cell spread statistics; `None` when no cell voltages are present.
    pub cells: Option<CellStats>,
}

impl DerivedMetrics {
    pub fn from_telemetry(telemetry: &Telemetry) -> Self {
        Self {
            power: telemetry.voltage * telemetry.current,
            cells: CellStats::from_cells(&telemetry.cell_voltages),
        }
    }
}
