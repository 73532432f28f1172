use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use provision_shared::codec::{self, FrameDecoder};
use provision_shared::{
    InstallFlags, InstallRequest, InstallTarget, Operation, PackageRef, Request, Response,
    ResponseStatus,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Variant {
    Os,
    Browser,
    Mobile,
}

/// Submit an install request and poll it to completion
#[derive(Debug, Parser)]
#[command(name = "provision-client")]
struct Args {
    /// Provision server address
    #[arg(long, default_value = "127.0.0.1:7070")]
    server: String,

    /// Device identity: `local` or a DUT agent address
    #[arg(long)]
    device: String,

    #[arg(long, value_enum)]
    variant: Variant,

    /// Image URL (OS image, browser component image, or mobile OS image)
    #[arg(long)]
    image_url: Option<String>,

    /// Expected OS version after an OS install
    #[arg(long)]
    verify_version: Option<String>,

    /// Component version override for a browser install
    #[arg(long)]
    override_version: Option<String>,

    /// Component root override for a browser install
    #[arg(long)]
    install_path: Option<String>,

    /// Mobile package as `name=url`, repeatable
    #[arg(long = "package")]
    packages: Vec<String>,

    #[arg(long)]
    prevent_reboot: bool,

    #[arg(long, default_value_t = 5)]
    poll_interval_secs: u64,
}

impl Args {
    fn target(&self) -> Result<InstallTarget> {
        match self.variant {
            Variant::Os => Ok(InstallTarget::OsImage {
                image_url: self
                    .image_url
                    .clone()
                    .context("--image-url is required for an OS install")?,
                verify_version: self.verify_version.clone(),
            }),
            Variant::Browser => Ok(InstallTarget::BrowserComponent {
                image_url: self
                    .image_url
                    .clone()
                    .context("--image-url is required for a browser install")?,
                override_version: self.override_version.clone(),
                override_install_path: self.install_path.clone(),
            }),
            Variant::Mobile => {
                let packages = self
                    .packages
                    .iter()
                    .map(|entry| parse_package(entry))
                    .collect::<Result<Vec<_>>>()?;
                Ok(InstallTarget::MobilePackages {
                    os_image_url: self.image_url.clone(),
                    packages,
                })
            }
        }
    }
}

fn parse_package(entry: &str) -> Result<PackageRef> {
    match entry.split_once('=') {
        Some((name, url)) if !name.is_empty() && !url.is_empty() => Ok(PackageRef {
            name: name.into(),
            url: url.into(),
        }),
        _ => bail!("package must be `name=url`, got `{}`", entry),
    }
}

struct Connection {
    stream: TcpStream,
    decoder: FrameDecoder,
    buf: Vec<u8>,
}

impl Connection {
    async fn open(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {}", addr))?;
        Ok(Self {
            stream,
            decoder: FrameDecoder::new(),
            buf: vec![0u8; 4096],
        })
    }

    async fn call(&mut self, request: &Request) -> Result<Operation> {
        let frame = codec::encode(request)?;
        self.stream.write_all(&frame).await?;

        loop {
            if let Some(response) = self.decoder.decode_next::<Response>()? {
                return match response {
                    Response::Operation(op) => Ok(op),
                    Response::Error { message } => bail!("server error: {}", message),
                };
            }
            let n = self.stream.read(&mut self.buf).await?;
            if n == 0 {
                bail!("server closed the connection");
            }
            self.decoder.extend(&self.buf[..n]);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let request = InstallRequest {
        device: args.device.clone(),
        flags: InstallFlags {
            prevent_reboot: args.prevent_reboot,
        },
        target: args.target()?,
    };

    let mut conn = Connection::open(&args.server).await?;
    let mut op = conn.call(&Request::Install(request)).await?;
    println!("operation {}", op.name);

    let poll_interval = Duration::from_secs(args.poll_interval_secs);
    while !op.done {
        tokio::time::sleep(poll_interval).await;
        op = conn
            .call(&Request::GetOperation {
                name: op.name.clone(),
            })
            .await?;
    }

    let status = match op.result {
        Some(result) => {
            if result.message.is_empty() {
                println!("{:?} ({:?})", result.status, result.reason);
            } else {
                println!("{:?} ({:?}): {}", result.status, result.reason, result.message);
            }
            result.status
        }
        None => {
            println!("operation completed without a result");
            ResponseStatus::ServerError
        }
    };

    std::process::exit(match status {
        ResponseStatus::Ok => 0,
        ResponseStatus::InvalidRequest => 2,
        ResponseStatus::ServerError => 1,
    });
}
