use avm_interface::protocol::{self, ProtocolVersion};
use avm_interface::{CallResults, InterpreterResult, RunParameters};
use wasmtime::Val;

use crate::error::RuntimeError;
use crate::lifecycle::Interpreter;
use crate::memory::{GuestSlice, SLOT_SIZE};

/// Return slot used when the guest exports no shadow-stack accessor.
pub const FIXED_RETURN_SLOT: u32 = 8;
/// Bytes carved out of the guest shadow stack for the return slot.
const STACK_SLOT_SIZE: i32 = 16;
const _: () = assert!(STACK_SLOT_SIZE as usize >= SLOT_SIZE);

/// One `invoke` argument, before it is copied into the guest.
enum Input<'a> {
    Text(&'a str),
    Bytes(&'a [u8]),
}

impl Interpreter {
    /// Run one interpreter step.
    ///
    /// A non-zero `ret_code` in the result is an ordinary outcome. Errors are
    /// reserved for failures to marshal, call or decode.
    #[tracing::instrument(skip_all, fields(protocol = %self.protocol))]
    pub fn invoke(
        &mut self,
        air: &str,
        prev_data: &[u8],
        data: &[u8],
        run_params: &RunParameters,
        call_results: &CallResults,
    ) -> Result<InterpreterResult, RuntimeError> {
        let log_level = self.log_level.as_str();

        let raw = match self.protocol {
            ProtocolVersion::Callback => {
                if !call_results.is_empty() {
                    tracing::warn!(
                        count = call_results.len(),
                        "callback protocol resolves calls during invoke; ignoring call results"
                    );
                }
                self.call_guest(&[
                    Input::Text(&run_params.init_peer_id),
                    Input::Text(air),
                    Input::Bytes(prev_data),
                    Input::Bytes(data),
                    Input::Text(log_level),
                ])?
            }
            ProtocolVersion::Split => {
                let request = protocol::encode_split_request(run_params, call_results)?;
                self.call_guest(&[
                    Input::Text(air),
                    Input::Bytes(prev_data),
                    Input::Bytes(data),
                    Input::Bytes(&request.params),
                    Input::Bytes(&request.call_results),
                    Input::Text(log_level),
                ])?
            }
            ProtocolVersion::Packed => {
                let payload =
                    protocol::encode_packed_request(air, prev_data, data, run_params, call_results)?;
                self.call_guest(&[Input::Text(&payload)])?
            }
        };

        let result = protocol::decode_outcome(self.protocol, &raw)?;
        tracing::debug!(
            ret_code = result.ret_code,
            data_len = result.data.len(),
            next_peers = result.next_peer_pks.len(),
            call_requests = result.call_requests.len(),
            "invoke finished"
        );
        Ok(result)
    }

    /// Copy `inputs` into the guest, call `invoke` and read back the string
    /// it returns.
    ///
    /// Inputs are owned by the guest once the call starts; the returned
    /// string is owned by the host and freed here.
    fn call_guest(&mut self, inputs: &[Input<'_>]) -> Result<String, RuntimeError> {
        let slices = self.write_inputs(inputs)?;

        let ret = self.acquire_return_slot()?;
        let mut params = Vec::with_capacity(1 + 2 * slices.len());
        params.push(Val::I32(ret as i32));
        for slice in &slices {
            let (ptr, len) = slice.raw();
            params.push(Val::I32(ptr));
            params.push(Val::I32(len));
        }

        let called = self
            .invoke
            .call(&mut self.store, &params, &mut [])
            .map_err(|e| RuntimeError::InvocationFailed(format!("{e:?}")));
        let slot = called.and_then(|()| self.guest.read_slot(&self.store, ret));
        let released = self.release_return_slot();
        let slot = slot?;
        released?;

        let raw = self.guest.read_str(&self.store, slot);
        self.guest.free(&mut self.store, slot)?;
        raw
    }

    /// Write every input, releasing the ones already written if a later one
    /// fails.
    fn write_inputs(&mut self, inputs: &[Input<'_>]) -> Result<Vec<GuestSlice>, RuntimeError> {
        let mut slices = Vec::with_capacity(inputs.len());
        for input in inputs {
            let written = match input {
                Input::Text(text) => self.guest.write_str(&mut self.store, text),
                Input::Bytes(bytes) => self.guest.write_bytes(&mut self.store, bytes),
            };
            match written {
                Ok(slice) => slices.push(slice),
                Err(e) => {
                    for slice in slices {
                        if let Err(free_err) = self.guest.free(&mut self.store, slice) {
                            tracing::warn!("cannot release invoke argument: {free_err}");
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(slices)
    }

    fn acquire_return_slot(&mut self) -> Result<u32, RuntimeError> {
        match &self.stack_pointer {
            Some(stack_pointer) => {
                let ptr = stack_pointer
                    .call(&mut self.store, -STACK_SLOT_SIZE)
                    .map_err(|e| RuntimeError::InvocationFailed(format!("shadow stack: {e}")))?;
                Ok(ptr as u32)
            }
            None => Ok(FIXED_RETURN_SLOT),
        }
    }

    fn release_return_slot(&mut self) -> Result<(), RuntimeError> {
        if let Some(stack_pointer) = &self.stack_pointer {
            stack_pointer
                .call(&mut self.store, STACK_SLOT_SIZE)
                .map_err(|e| RuntimeError::InvocationFailed(format!("shadow stack: {e}")))?;
        }
        Ok(())
    }
}
