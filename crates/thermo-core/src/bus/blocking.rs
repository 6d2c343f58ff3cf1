use embedded_hal::spi::{Error, ErrorKind, Mode, SpiDevice};
use log::{debug, warn};

use super::TransactionRequest;
use crate::peripherals::{BusConfig, BusDriver, DataWidth, DriverError};

/// Driver code reported when the configuration call is not supported.
pub const E_NOT_SUPPORTED: i32 = -4;

/// Adapts a blocking `embedded-hal` SPI device to [`BusDriver`].
///
/// The exchange runs to completion inside
/// [`begin_transaction`](BusDriver::begin_transaction) and the completion
/// cell is signalled before it returns. Clock rate, mode and chip select are
/// owned by the `SpiDevice`, so the configuration calls only check that the
/// requested settings are ones the device can honour.
///
/// # Example
///
/// ```no_run
/// # fn wire<S: embedded_hal::spi::SpiDevice<u8>>(spi: S) {
/// use thermo_core::bus::{BlockingSpiBus, CompletionStatus};
/// use thermo_core::sequencer::Sequencer;
///
/// static DONE: CompletionStatus = CompletionStatus::new();
///
/// let sequencer = Sequencer::new(BlockingSpiBus::new(spi), &DONE, 0);
/// # let _ = sequencer;
/// # }
/// ```
pub struct BlockingSpiBus<S> {
    spi: S,
    transfers: u32,
}

impl<S> BlockingSpiBus<S> {
    /// Create a new `BlockingSpiBus`.
    #[inline]
    pub const fn new(spi: S) -> Self {
        Self { spi, transfers: 0 }
    }

    /// Number of exchanges performed so far.
    pub fn transfers(&self) -> u32 {
        self.transfers
    }

    pub fn release(self) -> S {
        self.spi
    }
}

/// Map an `embedded-hal` error kind onto a negative driver status code.
fn status_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Overrun => -1,
        ErrorKind::ModeFault => -2,
        ErrorKind::FrameFormat => -3,
        ErrorKind::ChipSelectFault => -5,
        _ => -6,
    }
}

impl<'a, S> BusDriver<'a> for BlockingSpiBus<S>
where
    S: SpiDevice<u8>,
{
    fn init(&mut self, config: &BusConfig) -> Result<(), DriverError> {
        debug!(
            "Blocking SPI bus: {} Hz, CS{} (configured by the device)",
            config.speed_hz, config.chip_select
        );
        Ok(())
    }

    fn set_mode(&mut self, _mode: Mode) -> Result<(), DriverError> {
        Ok(())
    }

    fn set_data_width(&mut self, width: DataWidth) -> Result<(), DriverError> {
        match width {
            DataWidth::Standard => Ok(()),
            _ => Err(DriverError::new(E_NOT_SUPPORTED)),
        }
    }

    fn set_word_size(&mut self, bits: u8) -> Result<(), DriverError> {
        if bits == 8 {
            Ok(())
        } else {
            Err(DriverError::new(E_NOT_SUPPORTED))
        }
    }

    fn begin_transaction(&mut self, request: &mut TransactionRequest<'a>) {
        let len = request.transfer_len();
        let status = match self.spi.transfer(&mut request.rx[..len], &request.tx[..len]) {
            Ok(()) => 0,
            Err(e) => {
                warn!("SPI transfer failed: {:?}", e.kind());
                status_code(e.kind())
            }
        };
        self.transfers = self.transfers.wrapping_add(1);
        request.completion().complete(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Completion, CompletionStatus, TRANSFER_LEN};
    use embedded_hal::spi::{ErrorType, Operation};

    #[derive(Debug)]
    struct Overrun;

    impl Error for Overrun {
        fn kind(&self) -> ErrorKind {
            ErrorKind::Overrun
        }
    }

    /// Echoes `register + 1` in the data byte of each transfer.
    struct EchoSpi {
        fail: bool,
    }

    impl ErrorType for EchoSpi {
        type Error = Overrun;
    }

    impl SpiDevice<u8> for EchoSpi {
        fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Overrun> {
            if self.fail {
                return Err(Overrun);
            }
            for op in operations.iter_mut() {
                if let Operation::Transfer(read, write) = op {
                    read[0] = 0xFF;
                    read[1] = write[0].wrapping_add(1);
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_transfer_signals_success() {
        let done = CompletionStatus::new();
        let mut request = TransactionRequest::new(0, &done);
        let mut bus = BlockingSpiBus::new(EchoSpi { fail: false });

        request.load([0x02, 0x00]);
        done.begin().unwrap();
        bus.begin_transaction(&mut request);

        assert_eq!(done.state(), Completion::Done(0));
        assert_eq!(request.rx, [0xFF, 0x03]);
        assert_eq!(bus.transfers(), 1);
    }

    #[test]
    fn test_transfer_error_becomes_status_code() {
        let done = CompletionStatus::new();
        let mut request = TransactionRequest::new(0, &done);
        let mut bus = BlockingSpiBus::new(EchoSpi { fail: true });

        done.begin().unwrap();
        bus.begin_transaction(&mut request);

        assert_eq!(done.state(), Completion::Done(-1));
    }

    #[test]
    fn test_only_standard_eight_bit_configuration_is_accepted() {
        let mut bus = BlockingSpiBus::new(EchoSpi { fail: false });
        let driver: &mut dyn BusDriver<'_> = &mut bus;
        assert!(driver.set_data_width(DataWidth::Standard).is_ok());
        assert_eq!(
            driver.set_data_width(DataWidth::Quad),
            Err(DriverError::new(E_NOT_SUPPORTED))
        );
        assert!(driver.set_word_size(8).is_ok());
        assert!(driver.set_word_size(16).is_err());
    }

    /// Records the buffer lengths of every transfer.
    struct LengthSpi {
        lengths: std::vec::Vec<(usize, usize)>,
    }

    impl ErrorType for LengthSpi {
        type Error = Overrun;
    }

    impl SpiDevice<u8> for LengthSpi {
        fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Overrun> {
            for op in operations.iter_mut() {
                if let Operation::Transfer(read, write) = op {
                    self.lengths.push((read.len(), write.len()));
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_transfer_never_exceeds_request_buffers() {
        let done = CompletionStatus::new();
        let mut request = TransactionRequest::new(0, &done);
        let mut bus = BlockingSpiBus::new(LengthSpi {
            lengths: std::vec::Vec::new(),
        });

        for tx in [[0x02, 0x00], [0x80, 0x46]] {
            request.load(tx);
            done.begin().unwrap();
            bus.begin_transaction(&mut request);
        }

        let spi = bus.release();
        assert_eq!(spi.lengths, vec![(TRANSFER_LEN, TRANSFER_LEN); 2]);
    }
}
