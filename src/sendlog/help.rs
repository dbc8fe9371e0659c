pub(crate) const USAGE_MSG: &str = "usage: sendlog [-AnV] [-b ca_bundle] [-c cert_file] [-h host] [-i iolog-id] [-k key_file] [-p port] [-r restart-point] [-R reject-reason] [-t number] /path/to/iolog";

const DESCRIPTOR: &str = "sendlog - send sudo I/O log to log server";

const HELP_MSG: &str = "Options:
      --help               display help message and exit
  -A, --accept             only send an accept event (no I/O)
  -b, --ca-bundle=file     certificate bundle file to verify server's cert against
  -c, --cert=file          certificate file for TLS handshake
  -h, --host=host          host to send logs to
  -i, --iolog-id=id        remote ID of I/O log to be resumed
  -k, --key=file           private key file
  -n, --no-verify          do not verify server certificate
  -p, --port=port          port to use when connecting to host
  -r, --restart=time       restart previous I/O log transfer
  -R, --reject=reason      reject the command with the given reason
  -t, --test=number        test audit server by sending selected I/O log n times in parallel
  -V, --version            display version information and exit
";

pub(crate) fn long_help_message() -> String {
    format!("{USAGE_MSG}\n\n{DESCRIPTOR}\n\n{HELP_MSG}")
}
