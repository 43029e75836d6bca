use crate::codec::{Command, Descriptor};
use crate::error::{ArrayError, Result};
use crate::transport::Session;

use std::io::{Read, Write};

/// Whether the device array is attached. All block I/O requires `Mounted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Unmounted,
    Mounted,
}

impl Default for MountState {
    fn default() -> Self {
        MountState::Unmounted
    }
}

impl MountState {
    pub fn is_mounted(&self) -> bool {
        *self == MountState::Mounted
    }

    /// Attaches the array. The state only changes once the server accepted
    /// the MOUNT call.
    pub fn mount<S: Read + Write>(&mut self, session: &mut Session<S>) -> Result<()> {
        if self.is_mounted() {
            return Err(ArrayError::AlreadyMounted);
        }
        session.call(Descriptor::command_only(Command::Mount), None)?;
        *self = MountState::Mounted;
        debug!("Device array mounted.");
        Ok(())
    }

    pub fn unmount<S: Read + Write>(&mut self, session: &mut Session<S>) -> Result<()> {
        if !self.is_mounted() {
            return Err(ArrayError::NotMounted);
        }
        session.call(Descriptor::command_only(Command::Unmount), None)?;
        *self = MountState::Unmounted;
        debug!("Device array unmounted.");
        Ok(())
    }

    pub fn ensure_mounted(&self) -> Result<()> {
        if self.is_mounted() {
            Ok(())
        } else {
            Err(ArrayError::NotMounted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PacketHeader;
    use std::io::{self, Cursor};
    use zerocopy::AsBytes;

    struct Canned {
        replies: Cursor<Vec<u8>>,
        requests: usize,
    }

    impl Read for Canned {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.replies.read(buf)
        }
    }

    impl Write for Canned {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.requests += 1;
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn session_replying(replies: &[(Command, u16)]) -> Session<Canned> {
        let mut bytes = Vec::new();
        for (command, status) in replies {
            let op = Descriptor::command_only(*command).encode();
            bytes.extend_from_slice(PacketHeader::response(op, *status, 256).as_bytes());
        }
        Session::from_stream(
            Canned {
                replies: Cursor::new(bytes),
                requests: 0,
            },
            256,
        )
    }

    #[test]
    fn starts_unmounted() {
        assert_eq!(MountState::default(), MountState::Unmounted);
        assert!(matches!(
            MountState::default().ensure_mounted(),
            Err(ArrayError::NotMounted)
        ));
    }

    #[test]
    fn second_mount_fails_without_a_call() {
        let mut session = session_replying(&[(Command::Mount, 0)]);
        let mut state = MountState::default();

        state.mount(&mut session).unwrap();
        assert!(matches!(
            state.mount(&mut session),
            Err(ArrayError::AlreadyMounted)
        ));
        assert_eq!(state, MountState::Mounted);
        assert_eq!(session.get_ref().unwrap().requests, 1);
    }

    #[test]
    fn unmount_requires_mount() {
        let mut session = session_replying(&[(Command::Mount, 0), (Command::Unmount, 0)]);
        let mut state = MountState::default();

        assert!(matches!(
            state.unmount(&mut session),
            Err(ArrayError::NotMounted)
        ));
        state.mount(&mut session).unwrap();
        state.unmount(&mut session).unwrap();
        assert_eq!(state, MountState::Unmounted);
    }

    #[test]
    fn rejected_mount_leaves_state_unchanged() {
        let mut session = session_replying(&[(Command::Mount, 5)]);
        let mut state = MountState::default();

        assert!(matches!(
            state.mount(&mut session),
            Err(ArrayError::Device { status: 5, .. })
        ));
        assert_eq!(state, MountState::Unmounted);
    }
}
