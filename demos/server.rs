//
//  Sample application.
//
//  Listens on localhost:4918, plain http, no ssl.
//  Connect to http://localhost:4918/
//

use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::str::FromStr;

use clap::Parser;
use futures_util::future::TryFutureExt;

use webdav_engine::backend::memfs::MemFs;
use webdav_engine::{Backend, DavHandler};

fn handler(dir: Option<&str>, auth: Option<&str>) -> Result<DavHandler, Box<dyn Error>> {
    let backend = match (dir, auth) {
        (Some(dir), None) => Backend::local(dir, true),
        (Some(_), Some(_)) => return Err("--auth only works with the memory filesystem".into()),
        (None, Some(auth)) => {
            let (user, pass) = auth.split_once(':').ok_or("--auth wants user:password")?;
            Backend::custom(MemFs::new().with_credentials(user, pass))
        }
        (None, None) => Backend::Mem,
    };
    Ok(DavHandler::builder(backend).build())
}

#[derive(Debug, clap::Parser)]
#[command(about, version)]
struct Cli {
    /// port to listen on
    #[arg(short, long, default_value = "4918")]
    port: u16,
    /// local directory to serve
    #[arg(short, long)]
    dir: Option<String>,
    /// serve from ephemeral memory filesystem (the default)
    #[arg(short, long)]
    memfs: bool,
    /// require basic authentication, as user:password
    #[arg(short, long)]
    auth: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let Cli {
        port,
        dir,
        memfs,
        auth,
    } = Cli::parse();
    let dir = if memfs { None } else { dir };
    let name = dir.clone().unwrap_or_else(|| "memory filesystem".to_string());

    let dav_server = handler(dir.as_deref(), auth.as_deref())?;
    let make_service = hyper::service::make_service_fn(|_| {
        let dav_server = dav_server.clone();
        async move {
            let func = move |req| {
                let dav_server = dav_server.clone();
                async move { Ok::<_, Infallible>(dav_server.handle(req).await) }
            };
            Ok::<_, hyper::Error>(hyper::service::service_fn(func))
        }
    });

    let addr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))?;
    let server = hyper::Server::try_bind(&addr)?
        .serve(make_service)
        .map_err(|e| eprintln!("server error: {}", e));

    println!("Serving {} on {}", name, port);
    let _ = server.await;
    Ok(())
}
