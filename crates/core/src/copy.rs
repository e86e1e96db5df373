use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Result of a bidirectional copy: bytes moved in each direction and which
/// side closed first.
#[derive(Debug, Default, Clone, Copy)]
pub struct CopyResult {
	pub sent: u64,
	pub received: u64,
}

/// Shuttles bytes between two halves until either side reaches EOF, then
/// shuts down the write half of both so the peer observes the close.
///
/// This mirrors `tokio::io::copy_bidirectional` but tolerates one side
/// closing first: per the proxying contract, the connection is complete as
/// soon as either direction reaches EOF, not only when both do.
pub async fn copy_bidirectional<A, B>(a: &mut A, b: &mut B) -> std::io::Result<CopyResult>
where
	A: AsyncRead + AsyncWrite + Unpin + ?Sized,
	B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
	let (mut ar, mut aw) = tokio::io::split(a);
	let (mut br, mut bw) = tokio::io::split(b);

	let client_to_upstream = async {
		let n = tokio::io::copy(&mut ar, &mut bw).await?;
		bw.shutdown().await?;
		Ok::<u64, std::io::Error>(n)
	};
	let upstream_to_client = async {
		let n = tokio::io::copy(&mut br, &mut aw).await?;
		aw.shutdown().await?;
		Ok::<u64, std::io::Error>(n)
	};

	tokio::try_join!(client_to_upstream, upstream_to_client).map(|(sent, received)| CopyResult {
		sent,
		received,
	})
}
